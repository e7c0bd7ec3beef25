//! Per-room actor.
//!
//! Each live room is one tokio task owning the room's document replica
//! and its connection table; everything else talks to it through a
//! command channel, so document access needs no locking. The actor
//! persists a snapshot on a dirty timer, on graceful shutdown, and when
//! the last command sender drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use steproom_core::{
    generate_replica_id, Document, Op, ServerMessage, Snapshot, TrackConfig, REGISTRY_ROOM_ID,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::registry::Registry;
use crate::storage::SnapshotStore;

pub type ConnId = u64;

/// Point-in-time answer to a status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStatus {
    pub connections: usize,
    pub has_data: bool,
}

pub(crate) enum RoomCommand {
    Join {
        sender: mpsc::UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<ConnId>,
    },
    Leave {
        conn: ConnId,
    },
    Ops {
        from: ConnId,
        ops: Vec<Op>,
    },
    Status {
        reply: oneshot::Sender<RoomStatus>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cheap handle onto a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Registers a connection. The room replies with the connection id
    /// and pushes the full-state snapshot through `sender` before any
    /// rebroadcast ops.
    pub async fn join(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<ConnId, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join { sender, reply })
            .map_err(|_| RelayError::RoomClosed)?;
        rx.await.map_err(|_| RelayError::RoomClosed)
    }

    pub fn leave(&self, conn: ConnId) {
        let _ = self.tx.send(RoomCommand::Leave { conn });
    }

    pub fn ops(&self, from: ConnId, ops: Vec<Op>) {
        let _ = self.tx.send(RoomCommand::Ops { from, ops });
    }

    pub async fn status(&self) -> Result<RoomStatus, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Status { reply })
            .map_err(|_| RelayError::RoomClosed)?;
        rx.await.map_err(|_| RelayError::RoomClosed)
    }

    /// Persists and stops the actor; resolves once the final snapshot
    /// write has finished.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Shutdown { done })
            .map_err(|_| RelayError::RoomClosed)?;
        rx.await.map_err(|_| RelayError::RoomClosed)
    }
}

pub(crate) fn spawn_room(
    id: String,
    store: SnapshotStore,
    registry: Arc<Registry>,
    snapshot_interval: Duration,
) -> RoomHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_room(id, store, registry, snapshot_interval, rx));
    RoomHandle { tx }
}

struct RoomActor {
    id: String,
    doc: Document,
    conns: HashMap<ConnId, mpsc::UnboundedSender<ServerMessage>>,
    next_conn: ConnId,
    store: SnapshotStore,
    registry: Arc<Registry>,
    dirty: bool,
}

async fn run_room(
    id: String,
    store: SnapshotStore,
    registry: Arc<Registry>,
    snapshot_interval: Duration,
    mut rx: mpsc::UnboundedReceiver<RoomCommand>,
) {
    let config = TrackConfig::standard();
    let mut doc = match store.load_snapshot(&id).await {
        Ok(Some(snapshot)) => {
            info!(room = %id, "restored room from snapshot");
            Document::restore(generate_replica_id(), snapshot, &config)
        }
        Ok(None) => Document::new(generate_replica_id(), &config),
        Err(err) => {
            // An unreadable snapshot must not take the room down with
            // it; start fresh and let the next write replace the file.
            error!(room = %id, error = %err, "failed to load room snapshot, starting empty");
            Document::new(generate_replica_id(), &config)
        }
    };
    let report = doc.migrate_grids();
    let mut actor = RoomActor {
        id,
        doc,
        conns: HashMap::new(),
        next_conn: 1,
        store,
        registry,
        dirty: !report.is_noop(),
    };
    if actor.dirty {
        info!(room = %actor.id, grown = report.grown.len(), "migrated stored grids");
    }

    let mut ticker = tokio::time::interval(snapshot_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.reset();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(RoomCommand::Join { sender, reply }) => actor.join(sender, reply).await,
                Some(RoomCommand::Leave { conn }) => actor.leave(conn),
                Some(RoomCommand::Ops { from, ops }) => actor.ops(from, ops),
                Some(RoomCommand::Status { reply }) => {
                    let _ = reply.send(actor.status());
                }
                Some(RoomCommand::Shutdown { done }) => {
                    actor.persist_if_dirty().await;
                    let _ = done.send(());
                    return;
                }
                None => break,
            },
            _ = ticker.tick() => actor.persist_if_dirty().await,
        }
    }
    actor.persist_if_dirty().await;
}

impl RoomActor {
    async fn join(
        &mut self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<ConnId>,
    ) {
        let conn = self.next_conn;
        self.next_conn += 1;

        let snapshot = Snapshot::from_document(&self.doc);
        if sender.send(ServerMessage::Snapshot { snapshot }).is_err() {
            // Peer hung up between upgrade and join.
            let _ = reply.send(conn);
            return;
        }
        self.conns.insert(conn, sender);
        let _ = reply.send(conn);
        debug!(room = %self.id, conn, peers = self.conns.len(), "peer joined");
        self.broadcast_presence();
        self.announce().await;
    }

    fn leave(&mut self, conn: ConnId) {
        if self.conns.remove(&conn).is_some() {
            debug!(room = %self.id, conn, peers = self.conns.len(), "peer left");
            self.broadcast_presence();
        }
    }

    fn ops(&mut self, from: ConnId, ops: Vec<Op>) {
        if ops.is_empty() {
            return;
        }
        let batch = self.doc.apply_remote(&ops);
        for skipped in &batch.skipped {
            warn!(room = %self.id, reason = %skipped.reason, "dropped malformed op");
        }
        if batch.applied > 0 {
            self.dirty = true;
        }
        // Rebroadcast the original batch: peers merge idempotently, and
        // an op that lost here may still win on a replica that has not
        // seen the newer write yet.
        let message = ServerMessage::Ops { ops };
        for (id, sender) in &self.conns {
            if *id != from {
                let _ = sender.send(message.clone());
            }
        }
    }

    fn status(&self) -> RoomStatus {
        RoomStatus {
            connections: self.conns.len(),
            has_data: self.doc.has_active_cells(),
        }
    }

    fn broadcast_presence(&mut self) {
        let message = ServerMessage::Presence {
            peers: self.conns.len(),
        };
        for sender in self.conns.values() {
            let _ = sender.send(message.clone());
        }
    }

    async fn persist_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        let snapshot = Snapshot::from_document(&self.doc);
        match self.store.save_snapshot(&self.id, &snapshot).await {
            Ok(()) => {
                self.dirty = false;
                // Edits count as room activity; refresh the listing so
                // a room pruned while idle shows up again.
                self.announce().await;
            }
            // Keep dirty set; the next tick retries.
            Err(err) => error!(room = %self.id, error = %err, "failed to persist snapshot"),
        }
    }

    /// Re-registers with the lobby index. Registration is idempotent,
    /// and the listing prunes entries for idle empty rooms, so every
    /// join and every flushed edit announces again rather than only the
    /// first.
    async fn announce(&mut self) {
        // The registry room lists rooms; letting it register itself
        // would recurse.
        if self.id == REGISTRY_ROOM_ID {
            return;
        }
        if let Err(err) = self.registry.register(&self.id).await {
            warn!(room = %self.id, error = %err, "failed to announce room to registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steproom_core::{InstrumentId, Mutation, Stamp};

    fn test_registry(store: &SnapshotStore) -> Arc<Registry> {
        Arc::new(Registry::empty(store.clone()))
    }

    fn cell_op(counter: u64, replica: u64, col: u16, value: bool) -> Op {
        Op {
            mutation: Mutation::SetCell {
                instrument: InstrumentId::Drums,
                row: 0,
                col,
                value,
            },
            stamp: Stamp::new(counter, replica),
        }
    }

    #[tokio::test]
    async fn join_receives_snapshot_then_peer_ops() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = test_registry(&store);
        let room = spawn_room(
            "attic".into(),
            store,
            registry,
            Duration::from_secs(60),
        );

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let a = room.join(a_tx).await.unwrap();
        assert!(matches!(
            a_rx.recv().await.unwrap(),
            ServerMessage::Snapshot { .. }
        ));
        assert!(matches!(
            a_rx.recv().await.unwrap(),
            ServerMessage::Presence { peers: 1 }
        ));

        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let _b = room.join(b_tx).await.unwrap();
        assert!(matches!(
            b_rx.recv().await.unwrap(),
            ServerMessage::Snapshot { .. }
        ));

        room.ops(a, vec![cell_op(1, 70_000, 3, true)]);
        loop {
            match b_rx.recv().await.unwrap() {
                ServerMessage::Ops { ops } => {
                    assert_eq!(ops.len(), 1);
                    break;
                }
                ServerMessage::Presence { .. } => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
        // The sender must not hear its own ops back.
        assert!(matches!(
            a_rx.recv().await.unwrap(),
            ServerMessage::Presence { peers: 2 }
        ));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_reports_connections_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = test_registry(&store);
        let room = spawn_room(
            "attic".into(),
            store,
            registry,
            Duration::from_secs(60),
        );

        let status = room.status().await.unwrap();
        assert_eq!(
            status,
            RoomStatus {
                connections: 0,
                has_data: false
            }
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = room.join(tx).await.unwrap();
        room.ops(conn, vec![cell_op(1, 70_000, 0, true)]);
        let status = room.status().await.unwrap();
        assert_eq!(
            status,
            RoomStatus {
                connections: 1,
                has_data: true
            }
        );

        room.leave(conn);
        let status = room.status().await.unwrap();
        assert_eq!(status.connections, 0);
        assert!(status.has_data);
        drop(rx);
    }

    #[tokio::test]
    async fn shutdown_persists_and_cold_start_restores() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = test_registry(&store);

        let room = spawn_room(
            "attic".into(),
            store.clone(),
            Arc::clone(&registry),
            Duration::from_secs(60),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = room.join(tx).await.unwrap();
        room.ops(conn, vec![cell_op(1, 70_000, 5, true)]);
        room.shutdown().await.unwrap();

        let room = spawn_room("attic".into(), store, registry, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::unbounded_channel();
        room.join(tx).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMessage::Snapshot { snapshot } => assert!(snapshot.has_active_cells()),
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_join_announces_to_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = test_registry(&store);
        let room = spawn_room(
            "attic".into(),
            store.clone(),
            Arc::clone(&registry),
            Duration::from_secs(60),
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        room.join(tx).await.unwrap();
        let (tx, _rx2) = mpsc::unbounded_channel();
        room.join(tx).await.unwrap();
        // Registration is idempotent: two joins, one index entry.
        room.status().await.unwrap();
        let index = store.load_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains_key("attic"));
    }

    #[tokio::test]
    async fn registry_room_does_not_register_itself() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = test_registry(&store);
        let room = spawn_room(
            REGISTRY_ROOM_ID.into(),
            store.clone(),
            registry,
            Duration::from_secs(60),
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        room.join(tx).await.unwrap();
        room.status().await.unwrap();
        assert!(store.load_index().await.unwrap().is_empty());
    }
}
