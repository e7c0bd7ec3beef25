//! The replicated document store.
//!
//! One [`Document`] per room replica: a tree of instruments (per-cell
//! grid booleans, volume, effect send) plus root scalar registers (bpm,
//! kit, synth presets, grid width). Every field is a last-writer-wins
//! register keyed by a Lamport stamp, so the grid is a map of
//! independently addressable `(instrument, row, col) -> bool` cells and
//! merge semantics are commutative and idempotent regardless of arrival
//! order. There is deliberately no sequence CRDT here: two clients
//! toggling different cells never conflict, and same-cell races resolve
//! to the stamp-order winner on every replica.
//!
//! Rows are stored at the maximum grid width and reads are masked to
//! the shared width register. A width change therefore never creates or
//! destroys cell registers - it only moves the mask - which keeps width
//! flips commutative with concurrent cell writes.

use crate::config::{
    BassPreset, GridWidth, InstrumentId, KitName, LeadSlot, SynthPreset, TrackConfig,
};
use crate::stamp::{Register, ReplicaId, Stamp};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

mod events;

pub use events::{Change, ChangeBatch, Origin, SubscriptionId};

/// A single untagged mutation of one store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    SetCell {
        instrument: InstrumentId,
        row: u16,
        col: u16,
        value: bool,
    },
    SetVolume {
        instrument: InstrumentId,
        value: f64,
    },
    SetEffectSend {
        instrument: InstrumentId,
        value: f64,
    },
    SetBpm {
        value: u16,
    },
    SetKit {
        value: KitName,
    },
    SetLeadSynth {
        slot: LeadSlot,
        value: SynthPreset,
    },
    SetBassType {
        value: BassPreset,
    },
    SetGridWidth {
        value: GridWidth,
    },
}

/// A stamped mutation, the unit shipped over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    #[serde(flatten)]
    pub mutation: Mutation,
    pub stamp: Stamp,
}

/// Why a mutation was dropped instead of applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("row {row} not present in {instrument} grid")]
    MissingRow { instrument: InstrumentId, row: u16 },
    #[error("column {col} not present in {instrument} grid row {row}")]
    MissingColumn {
        instrument: InstrumentId,
        row: u16,
        col: u16,
    },
    #[error("value out of range for {field}")]
    InvalidValue { field: &'static str },
}

/// A dropped mutation together with the reason. Dropped mutations never
/// corrupt local state; callers log them and move on.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedOp {
    pub mutation: Mutation,
    pub reason: SkipReason,
}

/// Result of applying a local transaction: the stamped ops to ship to
/// the relay, plus anything that was skipped.
#[derive(Debug)]
pub struct AppliedLocal {
    pub ops: Vec<Op>,
    pub skipped: Vec<SkippedOp>,
}

/// Result of merging a remote batch. `applied` counts mutations that
/// won the merge rule; losers are silently absorbed (that is the point
/// of LWW), `skipped` collects malformed or out-of-range mutations.
#[derive(Debug, Default)]
pub struct AppliedBatch {
    pub applied: usize,
    pub lost: usize,
    pub skipped: Vec<SkippedOp>,
}

pub(crate) struct InstrumentState {
    pub(crate) grid: Vec<Vec<Register<bool>>>,
    pub(crate) volume: Register<f64>,
    pub(crate) effect_send: Register<f64>,
}

type Listener = Box<dyn FnMut(&ChangeBatch) + Send>;

pub struct Document {
    replica: ReplicaId,
    pub(crate) clock: u64,
    pub(crate) config: TrackConfig,
    pub(crate) bpm: Register<u16>,
    pub(crate) kit: Register<KitName>,
    pub(crate) lead1_synth: Register<SynthPreset>,
    pub(crate) lead2_synth: Register<SynthPreset>,
    pub(crate) bass_type: Register<BassPreset>,
    pub(crate) grid_width: Register<GridWidth>,
    pub(crate) instruments: IndexMap<InstrumentId, InstrumentState>,
    next_subscription: SubscriptionId,
    listeners: BTreeMap<SubscriptionId, Listener>,
}

impl Document {
    /// Creates a document seeded with defaults for every instrument in
    /// the track configuration. Scalars are never "missing": each
    /// register starts at its default under the zero stamp. Rows are
    /// stored at [`GridWidth::MAX`] and reads are masked to the shared
    /// width, so a width change never touches cell registers.
    pub fn new(replica: ReplicaId, config: &TrackConfig) -> Self {
        let mut instruments = IndexMap::new();
        for spec in config.instruments() {
            instruments.insert(
                spec.id,
                InstrumentState {
                    grid: seeded_grid(spec.rows(), GridWidth::MAX.columns()),
                    volume: Register::seeded(spec.default_volume),
                    effect_send: Register::seeded(spec.default_effect_send),
                },
            );
        }
        Self {
            replica,
            clock: 0,
            config: config.clone(),
            bpm: Register::seeded(120),
            kit: Register::seeded(KitName::KitA),
            lead1_synth: Register::seeded(SynthPreset::Analog),
            lead2_synth: Register::seeded(SynthPreset::Analog),
            bass_type: Register::seeded(BassPreset::Square),
            grid_width: Register::seeded(GridWidth::Sixteen),
            instruments,
            next_subscription: 1,
            listeners: BTreeMap::new(),
        }
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    // ----- reads ---------------------------------------------------------

    /// Cell value at `(instrument, row, col)`. Out-of-bounds reads are
    /// well-defined: they return `false`. Columns beyond the shared
    /// width read as `false` even when a hidden register holds `true`.
    pub fn cell(&self, instrument: InstrumentId, row: usize, col: usize) -> bool {
        if col >= self.grid_width.value().columns() {
            return false;
        }
        self.instruments
            .get(&instrument)
            .and_then(|state| state.grid.get(row))
            .and_then(|cells| cells.get(col))
            .map(|reg| reg.value())
            .unwrap_or(false)
    }

    /// Materialized boolean matrix for one instrument, masked to the
    /// shared width.
    pub fn grid(&self, instrument: InstrumentId) -> Vec<Vec<bool>> {
        let width = self.grid_width.value().columns();
        self.instruments
            .get(&instrument)
            .map(|state| {
                state
                    .grid
                    .iter()
                    .map(|row| row.iter().take(width).map(|reg| reg.value()).collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visible grid dimensions `(rows, cols)` for one instrument. The
    /// column count is the shared width; hidden storage beyond it does
    /// not show up here.
    pub fn grid_dimensions(&self, instrument: InstrumentId) -> (usize, usize) {
        match self.instruments.get(&instrument) {
            Some(state) => (state.grid.len(), self.grid_width.value().columns()),
            None => (0, 0),
        }
    }

    pub fn volume(&self, instrument: InstrumentId) -> f64 {
        self.instruments
            .get(&instrument)
            .map(|state| state.volume.value())
            .unwrap_or(0.0)
    }

    pub fn effect_send(&self, instrument: InstrumentId) -> f64 {
        self.instruments
            .get(&instrument)
            .map(|state| state.effect_send.value())
            .unwrap_or(0.0)
    }

    pub fn bpm(&self) -> u16 {
        self.bpm.value()
    }

    pub fn kit(&self) -> KitName {
        self.kit.value()
    }

    pub fn lead_synth(&self, slot: LeadSlot) -> SynthPreset {
        match slot {
            LeadSlot::Lead1 => self.lead1_synth.value(),
            LeadSlot::Lead2 => self.lead2_synth.value(),
        }
    }

    pub fn bass_type(&self) -> BassPreset {
        self.bass_type.value()
    }

    pub fn grid_width(&self) -> GridWidth {
        self.grid_width.value()
    }

    /// Whether any grid cell anywhere in the document is active. Drives
    /// the registry's "has data" probe.
    pub fn has_active_cells(&self) -> bool {
        self.instruments.values().any(|state| {
            state
                .grid
                .iter()
                .any(|row| row.iter().any(|reg| reg.value()))
        })
    }

    pub fn track_config(&self) -> &TrackConfig {
        &self.config
    }

    // ----- subscriptions -------------------------------------------------

    /// Registers a change listener and returns its lease token. The
    /// listener fires once per settled transaction, with the document
    /// already updated.
    pub fn on_change<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&ChangeBatch) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription = self.next_subscription.saturating_add(1);
        self.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn off_change(&mut self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    // ----- writes --------------------------------------------------------

    /// Applies a local transaction. Each mutation gets a fresh Lamport
    /// stamp, the whole batch is applied atomically, and one change
    /// batch tagged [`Origin::Local`] is emitted afterwards. Returns the
    /// stamped ops for the transport to ship.
    pub fn apply_local(&mut self, mutations: Vec<Mutation>) -> AppliedLocal {
        self.apply_tagged(mutations, Origin::Local)
    }

    /// Same as [`Document::apply_local`] but tagged [`Origin::Migration`],
    /// so subscribers can tell reconciliation writes from user edits.
    pub fn apply_migration_batch(&mut self, mutations: Vec<Mutation>) -> AppliedLocal {
        self.apply_tagged(mutations, Origin::Migration)
    }

    fn apply_tagged(&mut self, mutations: Vec<Mutation>, origin: Origin) -> AppliedLocal {
        let mut ops = Vec::with_capacity(mutations.len());
        let mut skipped = Vec::new();
        let mut changes = Vec::new();
        for mutation in mutations {
            let stamp = self.next_stamp();
            match self.apply_mutation(&mutation, stamp) {
                Ok(Some(change)) => {
                    changes.push(change);
                    ops.push(Op { mutation, stamp });
                }
                // A freshly stamped write always beats the current
                // register, so a local write never loses the race.
                Ok(None) => {}
                Err(reason) => skipped.push(SkippedOp { mutation, reason }),
            }
        }
        self.emit(origin, changes);
        AppliedLocal { ops, skipped }
    }

    /// Merges a batch of remote operations. Winning mutations are
    /// collected into one change batch tagged [`Origin::Remote`];
    /// losers are absorbed silently; malformed or out-of-range
    /// mutations are reported back without touching state.
    pub fn apply_remote(&mut self, ops: &[Op]) -> AppliedBatch {
        let mut batch = AppliedBatch::default();
        let mut changes = Vec::new();
        for op in ops {
            self.clock = self.clock.max(op.stamp.counter);
            match self.apply_mutation(&op.mutation, op.stamp) {
                Ok(Some(change)) => {
                    batch.applied += 1;
                    changes.push(change);
                }
                Ok(None) => batch.lost += 1,
                Err(reason) => batch.skipped.push(SkippedOp {
                    mutation: op.mutation.clone(),
                    reason,
                }),
            }
        }
        self.emit(Origin::Remote, changes);
        batch
    }

    fn next_stamp(&mut self) -> Stamp {
        self.clock += 1;
        Stamp::new(self.clock, self.replica)
    }

    fn apply_mutation(
        &mut self,
        mutation: &Mutation,
        stamp: Stamp,
    ) -> Result<Option<Change>, SkipReason> {
        match *mutation {
            Mutation::SetCell {
                instrument,
                row,
                col,
                value,
            } => {
                let state = self
                    .instruments
                    .get_mut(&instrument)
                    .ok_or(SkipReason::MissingRow { instrument, row })?;
                let cells = state
                    .grid
                    .get_mut(row as usize)
                    .ok_or(SkipReason::MissingRow { instrument, row })?;
                let reg = cells.get_mut(col as usize).ok_or(SkipReason::MissingColumn {
                    instrument,
                    row,
                    col,
                })?;
                Ok(reg.merge(value, stamp).then_some(Change::Cell {
                    instrument,
                    row,
                    col,
                    value,
                }))
            }
            Mutation::SetVolume { instrument, value } => {
                if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                    return Err(SkipReason::InvalidValue { field: "volume" });
                }
                let state = self
                    .instruments
                    .get_mut(&instrument)
                    .ok_or(SkipReason::InvalidValue { field: "volume" })?;
                Ok(state
                    .volume
                    .merge(value, stamp)
                    .then_some(Change::Volume { instrument, value }))
            }
            Mutation::SetEffectSend { instrument, value } => {
                if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                    return Err(SkipReason::InvalidValue {
                        field: "effect_send",
                    });
                }
                let state =
                    self.instruments
                        .get_mut(&instrument)
                        .ok_or(SkipReason::InvalidValue {
                            field: "effect_send",
                        })?;
                Ok(state
                    .effect_send
                    .merge(value, stamp)
                    .then_some(Change::EffectSend { instrument, value }))
            }
            Mutation::SetBpm { value } => {
                if value == 0 || value > 999 {
                    return Err(SkipReason::InvalidValue { field: "bpm" });
                }
                Ok(self
                    .bpm
                    .merge(value, stamp)
                    .then_some(Change::Bpm { value }))
            }
            Mutation::SetKit { value } => Ok(self
                .kit
                .merge(value, stamp)
                .then_some(Change::Kit { value })),
            Mutation::SetLeadSynth { slot, value } => {
                let reg = match slot {
                    LeadSlot::Lead1 => &mut self.lead1_synth,
                    LeadSlot::Lead2 => &mut self.lead2_synth,
                };
                Ok(reg
                    .merge(value, stamp)
                    .then_some(Change::LeadSynth { slot, value }))
            }
            Mutation::SetBassType { value } => Ok(self
                .bass_type
                .merge(value, stamp)
                .then_some(Change::BassType { value })),
            // A width change is a pure register write. Cell registers
            // are untouched: shrinking hides the tail columns behind
            // the read mask and expanding reveals them again, stamps
            // intact, so the merge stays commutative whatever order
            // width flips and cell writes arrive in.
            Mutation::SetGridWidth { value } => Ok(self
                .grid_width
                .merge(value, stamp)
                .then_some(Change::GridWidth { value })),
        }
    }

    pub(crate) fn emit(&mut self, origin: Origin, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let batch = ChangeBatch { origin, changes };
        for listener in self.listeners.values_mut() {
            listener(&batch);
        }
    }
}

pub(crate) fn seeded_grid(rows: usize, cols: usize) -> Vec<Vec<Register<bool>>> {
    (0..rows)
        .map(|_| (0..cols).map(|_| Register::seeded(false)).collect())
        .collect()
}
