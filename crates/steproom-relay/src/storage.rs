//! Durable room storage.
//!
//! One JSON file per room under the data directory, plus an index file
//! for the room registry mapping room ids to their last-activity time.
//! Writes go to a temp file first and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact rather than a
//! truncated one.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use steproom_core::{Snapshot, SnapshotError};
use thiserror::Error;
use tracing::debug;

const INDEX_FILE: &str = "rooms.index.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("registry index is corrupt: {0}")]
    Index(#[source] serde_json::Error),
}

/// Filesystem-backed snapshot store rooted at one data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        self.dir.join(format!("{room_id}.json"))
    }

    /// Loads a room snapshot, or `None` if the room was never persisted.
    pub async fn load_snapshot(&self, room_id: &str) -> Result<Option<Snapshot>, StorageError> {
        match tokio::fs::read_to_string(self.room_path(room_id)).await {
            Ok(data) => Ok(Some(Snapshot::from_json(&data)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_snapshot(
        &self,
        room_id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        let data = snapshot.to_json()?;
        self.write_atomic(&self.room_path(room_id), data).await?;
        debug!(room = %room_id, "snapshot persisted");
        Ok(())
    }

    pub async fn load_index(&self) -> Result<BTreeMap<String, u64>, StorageError> {
        match tokio::fs::read_to_string(self.dir.join(INDEX_FILE)).await {
            Ok(data) => serde_json::from_str(&data).map_err(StorageError::Index),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_index(&self, index: &BTreeMap<String, u64>) -> Result<(), StorageError> {
        let data = serde_json::to_string(index).map_err(StorageError::Index)?;
        self.write_atomic(&self.dir.join(INDEX_FILE), data).await
    }

    async fn write_atomic(&self, path: &Path, data: String) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steproom_core::{Document, InstrumentId, Mutation, TrackConfig};

    fn sample_snapshot() -> Snapshot {
        let mut doc = Document::new(70_000, &TrackConfig::standard());
        doc.apply_local(vec![
            Mutation::SetBpm { value: 101 },
            Mutation::SetCell {
                instrument: InstrumentId::Drums,
                row: 1,
                col: 2,
                value: true,
            },
        ]);
        Snapshot::from_document(&doc)
    }

    #[tokio::test]
    async fn snapshot_survives_a_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        assert!(store.load_snapshot("attic").await.unwrap().is_none());
        let snapshot = sample_snapshot();
        store.save_snapshot("attic", &snapshot).await.unwrap();
        let loaded = store.load_snapshot("attic").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn index_round_trips_and_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        assert!(store.load_index().await.unwrap().is_empty());
        let index: BTreeMap<String, u64> =
            [("attic".to_string(), 42), ("garage".to_string(), 7)].into();
        store.save_index(&index).await.unwrap();
        assert_eq!(store.load_index().await.unwrap(), index);
    }

    #[tokio::test]
    async fn corrupt_snapshot_reports_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        tokio::fs::write(dir.path().join("attic.json"), "{nope")
            .await
            .unwrap();
        assert!(matches!(
            store.load_snapshot("attic").await,
            Err(StorageError::Snapshot(_))
        ));
    }
}
