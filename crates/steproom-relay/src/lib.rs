//! Room relay for steproom.
//!
//! Accepts websocket connections per room, merges incoming operation
//! batches into the room's replica, rebroadcasts them to the other
//! peers, and persists snapshots so rooms survive restarts. A registry
//! room index backs the lobby's room listing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

pub mod error;
pub mod http;
pub mod manager;
pub mod registry;
pub mod room;
pub mod storage;

pub use error::RelayError;
pub use http::{
    AppState, RegisterRoomRequest, RoomStatusResponse, RoomSummaryBody, RoomsListResponse,
};
pub use manager::RoomManager;
pub use registry::{Registry, RoomStatusSource, RoomSummary};
pub use room::{RoomHandle, RoomStatus};
pub use storage::{SnapshotStore, StorageError};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub cors_origin: Option<String>,
    pub snapshot_interval: Duration,
}

/// Builds the HTTP router and its room manager from a config. The
/// manager is returned separately so the caller can drain rooms on
/// shutdown after the listener stops.
pub async fn build(config: &RelayConfig) -> Result<(Router, Arc<RoomManager>), RelayError> {
    let store = SnapshotStore::new(&config.data_dir)?;
    let registry = Arc::new(Registry::load(store.clone()).await?);
    let manager = Arc::new(RoomManager::new(
        store,
        registry,
        config.snapshot_interval,
    ));
    let state = AppState::new(Arc::clone(&manager), config.cors_origin.clone());
    Ok((http::router(state), manager))
}
