//! Core primitives for steproom.
//!
//! This crate holds everything both sides of the wire agree on: the
//! replicated document (grids plus scalar registers), the operation and
//! merge rules that make replicas converge, the snapshot codec the relay
//! persists, and the grid migration that reconciles stored grids with the
//! current track configuration.

pub mod config;
pub mod doc;
pub mod migrate;
pub mod proto;
pub mod snapshot;
pub mod stamp;

pub use config::{
    BassPreset, GridWidth, InstrumentId, InstrumentSpec, KitName, LeadSlot, SynthPreset,
    TrackConfig, REGISTRY_ROOM_ID,
};
pub use doc::{
    AppliedBatch, AppliedLocal, Change, ChangeBatch, Document, Mutation, Op, Origin, SkipReason,
    SkippedOp, SubscriptionId,
};
pub use migrate::{GridGrowth, MigrationReport};
pub use proto::{ClientMessage, ProtoError, ServerMessage};
pub use snapshot::{InstrumentSnapshot, Snapshot, SnapshotError};
pub use stamp::{generate_replica_id, Register, ReplicaId, Stamp, MIN_REPLICA_ID};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
