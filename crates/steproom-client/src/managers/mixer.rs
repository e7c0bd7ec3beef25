//! Per-instrument mix managers: volume and effect send.

use steproom_core::{Change, InstrumentId, Mutation, Origin, SubscriptionId};
use tracing::warn;

use crate::handle::DocHandle;

/// Per-track volume, `0.0..=1.0`.
pub struct VolumeSync {
    handle: DocHandle,
}

impl VolumeSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    pub fn get(&self, instrument: InstrumentId) -> f64 {
        self.handle.with_doc(move |doc| doc.volume(instrument))
    }

    pub fn set(&self, instrument: InstrumentId, value: f64) {
        if !(0.0..=1.0).contains(&value) || !value.is_finite() {
            warn!(%instrument, value, "ignoring out-of-range volume");
            return;
        }
        self.handle
            .mutate(vec![Mutation::SetVolume { instrument, value }]);
    }

    /// Fires `(instrument, value)` for every non-local volume change.
    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(InstrumentId, f64) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::Volume { instrument, value } = change {
                    callback(*instrument, *value);
                }
            }
        })
    }
}

/// Per-track effect send level, `0.0..=1.0`.
pub struct EffectSendSync {
    handle: DocHandle,
}

impl EffectSendSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    pub fn get(&self, instrument: InstrumentId) -> f64 {
        self.handle.with_doc(move |doc| doc.effect_send(instrument))
    }

    pub fn set(&self, instrument: InstrumentId, value: f64) {
        if !(0.0..=1.0).contains(&value) || !value.is_finite() {
            warn!(%instrument, value, "ignoring out-of-range effect send");
            return;
        }
        self.handle
            .mutate(vec![Mutation::SetEffectSend { instrument, value }]);
    }

    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(InstrumentId, f64) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::EffectSend { instrument, value } = change {
                    callback(*instrument, *value);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::test_support::{apply_remote, detached_handle};
    use std::sync::{Arc, Mutex};
    use steproom_core::{Op, Stamp};

    #[test]
    fn out_of_range_volume_is_rejected_before_it_ships() {
        let (handle, mut shipped) = detached_handle();
        let volume = VolumeSync::new(handle);

        volume.set(InstrumentId::Drums, 1.5);
        volume.set(InstrumentId::Drums, f64::NAN);
        assert!(shipped.try_recv().is_err());
        assert!((volume.get(InstrumentId::Drums) - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn remote_volume_changes_carry_the_instrument() {
        let (handle, _shipped) = detached_handle();
        let volume = VolumeSync::new(handle.clone());

        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        volume.on_change(move |instrument, value| {
            sink.lock().unwrap().push((instrument, value));
        });

        apply_remote(
            &handle,
            vec![Op {
                mutation: Mutation::SetVolume {
                    instrument: InstrumentId::Bass,
                    value: 0.3,
                },
                stamp: Stamp::new(5, 99_000),
            }],
        );

        assert_eq!(*fired.lock().unwrap(), vec![(InstrumentId::Bass, 0.3)]);
    }
}
