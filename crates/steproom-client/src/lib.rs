//! Client-side synchronization for steproom.
//!
//! [`Provider`] keeps a persistent connection to a room relay, replays
//! remote operations into the local [`steproom_core::Document`] replica
//! and reports connection/sync status. The typed managers in
//! [`managers`] wrap subtrees of the shared document with get/set/
//! subscribe surfaces that suppress local echo.

pub mod handle;
pub mod managers;
pub mod provider;

pub use handle::DocHandle;
pub use managers::{
    BassTypeSync, BpmSync, EffectSendSync, GridSync, KitSync, SynthTypeSync, VolumeSync,
};
pub use provider::{ConnectionState, ConnectionStatus, Provider, ProviderConfig, ProviderError};
