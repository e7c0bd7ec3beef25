//! Typed field sync managers.
//!
//! Each manager wraps one subtree of the shared document with a
//! `get` / `set` / `on_change` surface. `set` applies a local
//! transaction (and ships the resulting ops); `on_change` fires only
//! for changes that did not originate locally, with the store already
//! updated, so consumers can read back synchronously. Managers
//! subscribe once - the underlying subscription is a lease that stays
//! valid across resyncs.
//!
//! Callbacks run while the store lock is held; hand work off to your
//! own executor instead of calling back into a manager from inside one.

mod grid;
mod mixer;
mod scalar;

pub use grid::GridSync;
pub use mixer::{EffectSendSync, VolumeSync};
pub use scalar::{BassTypeSync, BpmSync, KitSync, SynthTypeSync};
