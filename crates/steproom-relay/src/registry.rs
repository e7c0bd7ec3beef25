//! Room registry.
//!
//! The registry tracks which rooms exist, and when each was last
//! active, so the lobby can list them most-recent first. Rooms announce
//! themselves on every join and on every snapshot flush; cleanup is
//! lazy - a registered room that turns out to have no connections and
//! no stored data is dropped from the index during the next listing,
//! rather than by any background sweep.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::room::RoomStatus;
use crate::storage::{SnapshotStore, StorageError};

/// Answers status probes during a listing. Implemented by the room
/// manager; tests substitute a canned map.
#[async_trait]
pub trait RoomStatusSource: Send + Sync {
    async fn room_status(&self, room_id: &str) -> Result<RoomStatus, RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub connections: usize,
}

pub struct Registry {
    rooms: Mutex<BTreeMap<String, u64>>,
    store: SnapshotStore,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Registry {
    /// Loads the persisted index from the store's data directory.
    pub async fn load(store: SnapshotStore) -> Result<Self, StorageError> {
        let rooms = store.load_index().await?;
        Ok(Self {
            rooms: Mutex::new(rooms),
            store,
        })
    }

    pub fn empty(store: SnapshotStore) -> Self {
        Self {
            rooms: Mutex::new(BTreeMap::new()),
            store,
        }
    }

    /// Adds a room to the index with the current time as its last
    /// activity, or refreshes the timestamp of a known room. Idempotent,
    /// so rooms can announce unconditionally.
    pub async fn register(&self, room_id: &str) -> Result<(), StorageError> {
        self.register_at(room_id, now_secs()).await
    }

    pub(crate) async fn register_at(
        &self,
        room_id: &str,
        last_active: u64,
    ) -> Result<(), StorageError> {
        let mut rooms = self.rooms.lock().await;
        let previous = rooms.insert(room_id.to_string(), last_active);
        if previous != Some(last_active) {
            self.store.save_index(&rooms).await?;
            if previous.is_none() {
                info!(room = %room_id, rooms = rooms.len(), "room registered");
            }
        }
        Ok(())
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.lock().await.contains_key(room_id)
    }

    /// Lists registered rooms with their live connection counts, most
    /// recently active first (room id breaks ties).
    ///
    /// Rooms that probe as empty (no connections, no stored data) are
    /// unregistered as a side effect. Rooms whose probe fails are
    /// omitted from this listing but stay registered; a transient fault
    /// must not unregister a room that still has data.
    pub async fn list(&self, probe: &dyn RoomStatusSource) -> Vec<RoomSummary> {
        let rooms: Vec<(String, u64)> = self
            .rooms
            .lock()
            .await
            .iter()
            .map(|(id, last_active)| (id.clone(), *last_active))
            .collect();
        let mut summaries = Vec::new();
        let mut stale = Vec::new();
        for (room_id, last_active) in rooms {
            match probe.room_status(&room_id).await {
                Ok(status) if status.connections == 0 && !status.has_data => {
                    stale.push(room_id);
                }
                Ok(status) => summaries.push((
                    last_active,
                    RoomSummary {
                        room_id,
                        connections: status.connections,
                    },
                )),
                Err(err) => {
                    warn!(room = %room_id, error = %err, "room status probe failed, omitting");
                }
            }
        }
        if !stale.is_empty() {
            let mut rooms = self.rooms.lock().await;
            for room_id in &stale {
                rooms.remove(room_id);
                info!(room = %room_id, "unregistered empty room");
            }
            if let Err(err) = self.store.save_index(&rooms).await {
                warn!(error = %err, "failed to persist registry index after cleanup");
            }
        }
        summaries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.room_id.cmp(&b.1.room_id)));
        summaries.into_iter().map(|(_, summary)| summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct CannedProbe {
        statuses: HashMap<String, RoomStatus>,
    }

    #[async_trait]
    impl RoomStatusSource for CannedProbe {
        async fn room_status(&self, room_id: &str) -> Result<RoomStatus, RelayError> {
            self.statuses
                .get(room_id)
                .copied()
                .ok_or(RelayError::RoomClosed)
        }
    }

    fn store() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn register_is_idempotent_and_persisted() {
        let (_dir, store) = store();
        let registry = Registry::empty(store.clone());
        registry.register("attic").await.unwrap();
        registry.register("attic").await.unwrap();
        registry.register("garage").await.unwrap();

        let reloaded = Registry::load(store).await.unwrap();
        assert!(reloaded.contains("attic").await);
        assert!(reloaded.contains("garage").await);
    }

    #[tokio::test]
    async fn listing_prunes_empty_rooms_and_keeps_the_rest() {
        let (_dir, store) = store();
        let registry = Registry::empty(store.clone());
        registry.register_at("busy", 200).await.unwrap();
        registry.register_at("idle-with-data", 100).await.unwrap();
        registry.register_at("ghost", 150).await.unwrap();

        let probe = CannedProbe {
            statuses: HashMap::from([
                (
                    "busy".to_string(),
                    RoomStatus {
                        connections: 2,
                        has_data: true,
                    },
                ),
                (
                    "idle-with-data".to_string(),
                    RoomStatus {
                        connections: 0,
                        has_data: true,
                    },
                ),
                (
                    "ghost".to_string(),
                    RoomStatus {
                        connections: 0,
                        has_data: false,
                    },
                ),
            ]),
        };

        let listed = registry.list(&probe).await;
        assert_eq!(
            listed,
            vec![
                RoomSummary {
                    room_id: "busy".to_string(),
                    connections: 2
                },
                RoomSummary {
                    room_id: "idle-with-data".to_string(),
                    connections: 0
                },
            ]
        );
        assert!(!registry.contains("ghost").await);
        // The cleanup reached disk too.
        assert!(!store.load_index().await.unwrap().contains_key("ghost"));
    }

    #[tokio::test]
    async fn listing_orders_rooms_by_recency() {
        let (_dir, store) = store();
        let registry = Registry::empty(store);
        registry.register_at("stale", 100).await.unwrap();
        registry.register_at("fresh", 200).await.unwrap();

        let probe = CannedProbe {
            statuses: HashMap::from([
                (
                    "stale".to_string(),
                    RoomStatus {
                        connections: 0,
                        has_data: true,
                    },
                ),
                (
                    "fresh".to_string(),
                    RoomStatus {
                        connections: 0,
                        has_data: true,
                    },
                ),
            ]),
        };

        let listed = registry.list(&probe).await;
        let ids: Vec<&str> = listed.iter().map(|s| s.room_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "stale"]);

        // A later announcement moves a room back to the front.
        registry.register_at("stale", 300).await.unwrap();
        let listed = registry.list(&probe).await;
        let ids: Vec<&str> = listed.iter().map(|s| s.room_id.as_str()).collect();
        assert_eq!(ids, vec!["stale", "fresh"]);
    }

    #[tokio::test]
    async fn failed_probe_omits_but_keeps_the_room_registered() {
        let (_dir, store) = store();
        let registry = Registry::empty(store);
        registry.register("flaky").await.unwrap();

        let probe = CannedProbe {
            statuses: HashMap::new(),
        };
        assert!(registry.list(&probe).await.is_empty());
        assert!(registry.contains("flaky").await);
    }
}
