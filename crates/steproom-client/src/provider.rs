//! Transport provider: the persistent connection between a local
//! replica and its room relay.
//!
//! Connection lifecycle: `disconnected -> connecting -> connected ->
//! synced`, where `connected && !synced` means the full-state handshake
//! is still in flight. Any socket error drops back to `disconnected`
//! and the provider retries with exponential backoff until closed.
//! While not yet synced, local reads may reflect stale defaults; the
//! snapshot merge emits remote-origin change events, so subscribers
//! pick up the authoritative state as soon as the handshake lands.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use steproom_core::proto::{ClientMessage, ServerMessage};
use steproom_core::{generate_replica_id, Document, Op, TrackConfig};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::handle::DocHandle;

const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub peers: usize,
}

impl ConnectionStatus {
    pub fn connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Synced
        )
    }

    pub fn synced(&self) -> bool {
        self.state == ConnectionState::Synced
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            peers: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Relay host, e.g. `127.0.0.1:1999`.
    pub host: String,
    pub room_id: String,
}

impl ProviderConfig {
    pub fn new(host: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            room_id: room_id.into(),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/{}/ws", self.host, self.room_id)
    }
}

type StatusListener = Box<dyn FnMut(ConnectionStatus) + Send>;

struct StatusHub {
    current: watch::Sender<ConnectionStatus>,
    listeners: Mutex<BTreeMap<u64, StatusListener>>,
    next_listener: Mutex<u64>,
}

impl StatusHub {
    fn new() -> Self {
        Self {
            current: watch::channel(ConnectionStatus::default()).0,
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: Mutex::new(1),
        }
    }

    fn get(&self) -> ConnectionStatus {
        *self.current.borrow()
    }

    fn subscribe_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.current.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectionStatus)) {
        let mut changed = false;
        self.current.send_modify(|status| {
            let before = *status;
            apply(status);
            changed = before != *status;
        });
        if !changed {
            return;
        }
        let status = self.get();
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.values_mut() {
            listener(status);
        }
    }

    fn add_listener(&self, listener: StatusListener) -> u64 {
        let mut next = self
            .next_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = *next;
        *next += 1;
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        id
    }

    fn remove_listener(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Maintains the room connection and the local replica behind it.
pub struct Provider {
    handle: DocHandle,
    status: Arc<StatusHub>,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    room_id: String,
}

impl Provider {
    /// Spawns the connection task and returns immediately; the returned
    /// provider starts in `connecting` and reaches `synced` after the
    /// full-state handshake. Must be called within a tokio runtime.
    pub fn connect(config: ProviderConfig) -> Self {
        let replica = generate_replica_id();
        let doc = Arc::new(Mutex::new(Document::new(
            replica,
            &TrackConfig::standard(),
        )));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = DocHandle::new(Arc::clone(&doc), outbound_tx, Arc::clone(&closed));
        let status = Arc::new(StatusHub::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let url = config.ws_url();
        let room_id = config.room_id.clone();
        let task = tokio::spawn(run_connection(
            url,
            doc,
            outbound_rx,
            Arc::clone(&status),
            shutdown_rx,
        ));

        Self {
            handle,
            status,
            closed,
            shutdown: shutdown_tx,
            task,
            room_id,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Shared handle to the replica, for field managers.
    pub fn handle(&self) -> DocHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Current peer count, as reported by the presence channel.
    pub fn peers(&self) -> usize {
        self.status.get().peers
    }

    pub fn on_status<F>(&self, listener: F) -> u64
    where
        F: FnMut(ConnectionStatus) + Send + 'static,
    {
        self.status.add_listener(Box::new(listener))
    }

    pub fn off_status(&self, id: u64) -> bool {
        self.status.remove_listener(id)
    }

    /// Waits until the provider reports synced. Consumers defer their
    /// first authoritative read until this resolves.
    pub async fn wait_synced(&self) -> Result<(), ProviderError> {
        let mut rx = self.status.subscribe_watch();
        rx.wait_for(|status| status.synced())
            .await
            .map(|_| ())
            .map_err(|_| ProviderError::Closed)
    }

    /// Tears down the socket and disposes the replica: subsequent
    /// mutations through any surviving [`DocHandle`] are no-ops.
    pub async fn close(self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

async fn run_connection(
    url: String,
    doc: Arc<Mutex<Document>>,
    mut outbound: mpsc::UnboundedReceiver<Vec<Op>>,
    status: Arc<StatusHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = BACKOFF_INITIAL;
    loop {
        if *shutdown.borrow() {
            break;
        }
        status.update(|s| s.state = ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((socket, _)) => {
                debug!(url = %url, "room connection established");
                status.update(|s| s.state = ConnectionState::Connected);
                let (end, reached_sync) =
                    run_session(socket, &doc, &mut outbound, &status, &mut shutdown).await;
                status.update(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.peers = 0;
                });
                if reached_sync {
                    backoff = BACKOFF_INITIAL;
                }
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost => warn!(url = %url, "room connection lost, retrying"),
                }
            }
            Err(err) => {
                warn!(url = %url, error = %err, "room connection failed");
                status.update(|s| s.state = ConnectionState::Disconnected);
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
    status.update(|s| {
        s.state = ConnectionState::Disconnected;
        s.peers = 0;
    });
}

async fn run_session(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    doc: &Arc<Mutex<Document>>,
    outbound: &mut mpsc::UnboundedReceiver<Vec<Op>>,
    status: &StatusHub,
    shutdown: &mut watch::Receiver<bool>,
) -> (SessionEnd, bool) {
    let (mut sink, mut stream) = socket.split();
    let mut reached_sync = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return (SessionEnd::Shutdown, reached_sync);
            }
            ops = outbound.recv() => match ops {
                Some(ops) => {
                    let message = ClientMessage::Ops { ops };
                    match message.encode() {
                        Ok(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                return (SessionEnd::Lost, reached_sync);
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to encode outbound ops"),
                    }
                }
                // All handles dropped; nothing left to ship.
                None => return (SessionEnd::Shutdown, reached_sync),
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if handle_server_message(&text, doc, status) {
                        reached_sync = true;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => return (SessionEnd::Lost, reached_sync),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "room connection errored");
                    return (SessionEnd::Lost, reached_sync);
                }
            },
        }
    }
}

/// Applies one inbound frame. Returns `true` when the frame was the
/// full-state handshake that flips this replica to synced.
fn handle_server_message(text: &str, doc: &Arc<Mutex<Document>>, status: &StatusHub) -> bool {
    let message = match ServerMessage::decode(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "dropping malformed server message");
            return false;
        }
    };
    match message {
        ServerMessage::Snapshot { snapshot } => {
            {
                let mut doc = doc.lock().unwrap_or_else(PoisonError::into_inner);
                let batch = doc.apply_remote(&snapshot.into_ops());
                for skipped in &batch.skipped {
                    warn!(reason = %skipped.reason, "skipped snapshot mutation");
                }
                // Reconcile stored grid dimensions with the compiled-in
                // track configuration, once per successful resync.
                let report = doc.migrate_grids();
                if !report.is_noop() {
                    info!(grown = report.grown.len(), "grid migration applied");
                }
            }
            status.update(|s| s.state = ConnectionState::Synced);
            true
        }
        ServerMessage::Ops { ops } => {
            let mut doc = doc.lock().unwrap_or_else(PoisonError::into_inner);
            let batch = doc.apply_remote(&ops);
            for skipped in &batch.skipped {
                warn!(reason = %skipped.reason, "dropped malformed remote operation");
            }
            false
        }
        ServerMessage::Presence { peers } => {
            status.update(|s| s.peers = peers);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_disconnected() {
        let status = ConnectionStatus::default();
        assert!(!status.connected());
        assert!(!status.synced());
        assert_eq!(status.peers, 0);
    }

    #[test]
    fn status_hub_notifies_only_on_change() {
        let hub = StatusHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.add_listener(Box::new(move |status| {
            sink.lock().unwrap().push(status.state)
        }));

        hub.update(|s| s.state = ConnectionState::Connecting);
        hub.update(|s| s.state = ConnectionState::Connecting);
        hub.update(|s| s.state = ConnectionState::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn ws_url_includes_room_path() {
        let config = ProviderConfig::new("127.0.0.1:1999", "echo-park");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:1999/echo-park/ws");
    }
}
