use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The room actor went away mid-request (shutdown race).
    #[error("room is no longer running")]
    RoomClosed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
