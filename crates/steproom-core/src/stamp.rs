//! Lamport stamps and last-writer-wins registers.
//!
//! Every field in the shared document is a register merged by stamp
//! order, so replicas converge no matter the order operations arrive
//! in. Stamps order by counter first and replica id second; the replica
//! id only breaks ties between writes issued concurrently.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Replica identifier, one per connected client and one per relay.
pub type ReplicaId = u64;

/// Minimum valid replica id. Smaller values are reserved for seeded
/// defaults so that any real write beats them.
pub const MIN_REPLICA_ID: u64 = 65_536;

/// Generates a random replica id above [`MIN_REPLICA_ID`].
pub fn generate_replica_id() -> ReplicaId {
    let mut rng = rand::thread_rng();
    rng.gen_range(MIN_REPLICA_ID..=i64::MAX as u64)
}

/// Lamport stamp: `(counter, replica)` with lexicographic order.
///
/// Field order matters: the derived `Ord` compares `counter` first,
/// then `replica`, which is exactly the total order the merge rule
/// relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Stamp {
    pub counter: u64,
    pub replica: ReplicaId,
}

impl Stamp {
    pub fn new(counter: u64, replica: ReplicaId) -> Self {
        Self { counter, replica }
    }

    /// Stamp used for seeded defaults; loses against every real write.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// A single last-writer-wins register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register<T> {
    value: T,
    stamp: Stamp,
}

impl<T> Register<T> {
    /// Register seeded at document creation. Carries the zero stamp so
    /// any replicated write, however old, overrides the default.
    pub fn seeded(value: T) -> Self {
        Self {
            value,
            stamp: Stamp::zero(),
        }
    }

    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Applies a write if it wins the LWW race. Returns `true` when the
    /// register changed owner (even if the value itself is equal - the
    /// caller decides whether to notify).
    pub fn merge(&mut self, value: T, stamp: Stamp) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }
}

impl<T: Copy> Register<T> {
    pub fn value(&self) -> T {
        self.value
    }
}
