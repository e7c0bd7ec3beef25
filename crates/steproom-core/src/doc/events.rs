use crate::config::{BassPreset, GridWidth, InstrumentId, KitName, LeadSlot, SynthPreset};

/// Where a transaction originated, relative to this process.
///
/// The tag is local metadata only - it is consumed to suppress local
/// echo in change subscribers and never leaves the process. Remote
/// peers always see inbound operations as `Remote` relative to
/// themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
    Migration,
}

/// One discrete, typed change that survived the merge rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Cell {
        instrument: InstrumentId,
        row: u16,
        col: u16,
        value: bool,
    },
    Volume {
        instrument: InstrumentId,
        value: f64,
    },
    EffectSend {
        instrument: InstrumentId,
        value: f64,
    },
    Bpm {
        value: u16,
    },
    Kit {
        value: KitName,
    },
    LeadSynth {
        slot: LeadSlot,
        value: SynthPreset,
    },
    BassType {
        value: BassPreset,
    },
    GridWidth {
        value: GridWidth,
    },
    /// A grid grew to match the track configuration. Carries the new
    /// dimensions; preserved cells did not change value.
    GridMigrated {
        instrument: InstrumentId,
        rows: u16,
        cols: u16,
    },
}

/// All changes from one transaction, delivered after the document has
/// fully settled - subscribers never observe a partially applied batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub origin: Origin,
    pub changes: Vec<Change>,
}

/// Token returned by [`Document::on_change`](super::Document::on_change).
///
/// The subscription is a lease on the document itself: snapshot merges
/// mutate the document in place rather than replacing it, so the token
/// stays valid across resyncs and consumers subscribe exactly once.
pub type SubscriptionId = u64;
