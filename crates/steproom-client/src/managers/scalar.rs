//! Managers for the root scalar registers: bpm, kit, synth presets.

use steproom_core::{
    BassPreset, Change, KitName, LeadSlot, Mutation, Origin, SubscriptionId, SynthPreset,
};

use crate::handle::DocHandle;

/// Shared tempo, in beats per minute.
pub struct BpmSync {
    handle: DocHandle,
}

impl BpmSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    pub fn get(&self) -> u16 {
        self.handle.with_doc(|doc| doc.bpm())
    }

    pub fn set(&self, value: u16) {
        self.handle.mutate(vec![Mutation::SetBpm { value }]);
    }

    /// Fires for bpm changes that did not originate locally.
    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(u16) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::Bpm { value } = change {
                    callback(*value);
                }
            }
        })
    }
}

/// Shared drum kit selection.
pub struct KitSync {
    handle: DocHandle,
}

impl KitSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    pub fn get(&self) -> KitName {
        self.handle.with_doc(|doc| doc.kit())
    }

    pub fn set(&self, value: KitName) {
        self.handle.mutate(vec![Mutation::SetKit { value }]);
    }

    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(KitName) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::Kit { value } = change {
                    callback(*value);
                }
            }
        })
    }
}

/// Synth preset for one of the two lead tracks.
pub struct SynthTypeSync {
    handle: DocHandle,
    slot: LeadSlot,
}

impl SynthTypeSync {
    pub fn new(handle: DocHandle, slot: LeadSlot) -> Self {
        Self { handle, slot }
    }

    pub fn slot(&self) -> LeadSlot {
        self.slot
    }

    pub fn get(&self) -> SynthPreset {
        let slot = self.slot;
        self.handle.with_doc(move |doc| doc.lead_synth(slot))
    }

    pub fn set(&self, value: SynthPreset) {
        self.handle.mutate(vec![Mutation::SetLeadSynth {
            slot: self.slot,
            value,
        }]);
    }

    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(SynthPreset) + Send + 'static,
    {
        let slot = self.slot;
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::LeadSynth { slot: s, value } = change {
                    if *s == slot {
                        callback(*value);
                    }
                }
            }
        })
    }
}

/// Bass oscillator preset.
pub struct BassTypeSync {
    handle: DocHandle,
}

impl BassTypeSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    pub fn get(&self) -> BassPreset {
        self.handle.with_doc(|doc| doc.bass_type())
    }

    pub fn set(&self, value: BassPreset) {
        self.handle.mutate(vec![Mutation::SetBassType { value }]);
    }

    pub fn on_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(BassPreset) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::BassType { value } = change {
                    callback(*value);
                }
            }
        })
    }
}
