//! Room lifecycle: lazy actor spawn and status probes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::RelayError;
use crate::registry::{Registry, RoomStatusSource};
use crate::room::{spawn_room, RoomHandle, RoomStatus};
use crate::storage::SnapshotStore;

pub struct RoomManager {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    store: SnapshotStore,
    registry: Arc<Registry>,
    snapshot_interval: Duration,
}

impl RoomManager {
    pub fn new(store: SnapshotStore, registry: Arc<Registry>, snapshot_interval: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            store,
            registry,
            snapshot_interval,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns the handle for a room, spawning its actor on first use.
    /// Actors stay resident once spawned; an idle room costs one parked
    /// task and is torn down only by [`RoomManager::shutdown_all`].
    pub async fn room(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(room_id) {
            return handle.clone();
        }
        info!(room = %room_id, "spawning room");
        let handle = spawn_room(
            room_id.to_string(),
            self.store.clone(),
            Arc::clone(&self.registry),
            self.snapshot_interval,
        );
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Status for a room without waking it: a live actor answers
    /// directly, otherwise the stored snapshot is probed, and a room
    /// with neither reads as empty.
    pub async fn status(&self, room_id: &str) -> Result<RoomStatus, RelayError> {
        let live = self.rooms.lock().await.get(room_id).cloned();
        if let Some(handle) = live {
            match handle.status().await {
                Ok(status) => return Ok(status),
                Err(RelayError::RoomClosed) => {
                    self.rooms.lock().await.remove(room_id);
                }
                Err(err) => return Err(err),
            }
        }
        let has_data = match self.store.load_snapshot(room_id).await? {
            Some(snapshot) => snapshot.has_active_cells(),
            None => false,
        };
        Ok(RoomStatus {
            connections: 0,
            has_data,
        })
    }

    /// Persists and stops every live room. Called on graceful shutdown
    /// after the listener has closed.
    pub async fn shutdown_all(&self) {
        let rooms: Vec<(String, RoomHandle)> = self.rooms.lock().await.drain().collect();
        for (room_id, handle) in rooms {
            if handle.shutdown().await.is_ok() {
                info!(room = %room_id, "room shut down");
            }
        }
    }
}

#[async_trait]
impl RoomStatusSource for RoomManager {
    async fn room_status(&self, room_id: &str) -> Result<RoomStatus, RelayError> {
        self.status(room_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steproom_core::{InstrumentId, Mutation, Op, ServerMessage, Stamp};
    use tokio::sync::mpsc;

    fn manager() -> (tempfile::TempDir, RoomManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let registry = Arc::new(Registry::empty(store.clone()));
        let manager = RoomManager::new(store, registry, Duration::from_secs(60));
        (dir, manager)
    }

    #[tokio::test]
    async fn unknown_room_probes_as_empty_without_spawning() {
        let (_dir, manager) = manager();
        let status = manager.status("never-seen").await.unwrap();
        assert_eq!(status.connections, 0);
        assert!(!status.has_data);
        assert!(manager.rooms.lock().await.is_empty());
    }

    #[tokio::test]
    async fn room_handles_are_shared_per_id() {
        let (_dir, manager) = manager();
        let a = manager.room("attic").await;
        let b = manager.room("attic").await;

        let (tx, _rx) = mpsc::unbounded_channel::<ServerMessage>();
        a.join(tx).await.unwrap();
        assert_eq!(b.status().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn room_reappears_in_the_registry_after_a_prune_and_rejoin() {
        let (_dir, manager) = manager();
        let room = manager.room("attic").await;

        let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
        let conn = room.join(tx).await.unwrap();
        room.leave(conn);
        drop(rx);
        // A status round-trip drains the command queue so the leave has
        // settled before the listing runs.
        room.status().await.unwrap();

        // No connections, no data: the listing prunes the room.
        let listed = manager.registry().list(&manager).await;
        assert!(listed.is_empty());
        assert!(!manager.registry().contains("attic").await);

        // Rejoining announces again even though the actor never died.
        let (tx, _rx) = mpsc::unbounded_channel::<ServerMessage>();
        room.join(tx).await.unwrap();
        room.status().await.unwrap();
        let listed = manager.registry().list(&manager).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].room_id, "attic");
        assert_eq!(listed[0].connections, 1);
    }

    #[tokio::test]
    async fn shutdown_leaves_a_probeable_snapshot_behind() {
        let (_dir, manager) = manager();
        let room = manager.room("attic").await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = room.join(tx).await.unwrap();
        room.ops(
            conn,
            vec![Op {
                mutation: Mutation::SetCell {
                    instrument: InstrumentId::Drums,
                    row: 0,
                    col: 0,
                    value: true,
                },
                stamp: Stamp::new(1, 70_000),
            }],
        );
        manager.shutdown_all().await;

        let status = manager.status("attic").await.unwrap();
        assert_eq!(status.connections, 0);
        assert!(status.has_data);
    }
}
