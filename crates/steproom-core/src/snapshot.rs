//! Durable snapshot codec.
//!
//! One JSON blob per room, written by the relay on a timer and on
//! graceful shutdown, read back on cold start. Registers are persisted
//! *with* their stamps so last-writer-wins survives a restart; a
//! snapshot is also the full-state handshake payload a freshly
//! connected client merges before reporting itself synced.

use crate::config::{
    BassPreset, GridWidth, InstrumentId, KitName, LeadSlot, SynthPreset, TrackConfig,
};
use crate::doc::{Document, Mutation, Op};
use crate::stamp::{Register, ReplicaId, Stamp};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("snapshot deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub grid: Vec<Vec<Register<bool>>>,
    pub volume: Register<f64>,
    pub effect_send: Register<f64>,
}

/// Full serialization of one room's document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub clock: u64,
    pub bpm: Register<u16>,
    pub kit: Register<KitName>,
    pub lead1_synth: Register<SynthPreset>,
    pub lead2_synth: Register<SynthPreset>,
    pub bass_type: Register<BassPreset>,
    pub grid_width: Register<GridWidth>,
    pub instruments: IndexMap<InstrumentId, InstrumentSnapshot>,
}

impl Snapshot {
    pub fn from_document(doc: &Document) -> Self {
        let instruments = doc
            .instruments
            .iter()
            .map(|(id, state)| {
                (
                    *id,
                    InstrumentSnapshot {
                        grid: state.grid.clone(),
                        volume: state.volume.clone(),
                        effect_send: state.effect_send.clone(),
                    },
                )
            })
            .collect();
        Self {
            clock: doc.clock,
            bpm: doc.bpm.clone(),
            kit: doc.kit.clone(),
            lead1_synth: doc.lead1_synth.clone(),
            lead2_synth: doc.lead2_synth.clone(),
            bass_type: doc.bass_type.clone(),
            grid_width: doc.grid_width.clone(),
            instruments,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(SnapshotError::Serialize)
    }

    pub fn from_json(data: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(data).map_err(SnapshotError::Deserialize)
    }

    /// Whether any persisted grid cell is active. Drives the registry's
    /// "has data" probe without instantiating a document.
    pub fn has_active_cells(&self) -> bool {
        self.instruments.values().any(|instr| {
            instr
                .grid
                .iter()
                .any(|row| row.iter().any(|reg| *reg.get()))
        })
    }

    /// Lowers the snapshot into a stream of stamped operations for
    /// merging into a live replica. Registers still carrying the zero
    /// seed stamp are omitted - they are defaults the receiver already
    /// has.
    pub fn into_ops(self) -> Vec<Op> {
        let mut ops = Vec::new();
        push_register_op(&mut ops, &self.grid_width, |value| Mutation::SetGridWidth {
            value,
        });
        push_register_op(&mut ops, &self.bpm, |value| Mutation::SetBpm { value });
        push_register_op(&mut ops, &self.kit, |value| Mutation::SetKit { value });
        push_register_op(&mut ops, &self.lead1_synth, |value| Mutation::SetLeadSynth {
            slot: LeadSlot::Lead1,
            value,
        });
        push_register_op(&mut ops, &self.lead2_synth, |value| Mutation::SetLeadSynth {
            slot: LeadSlot::Lead2,
            value,
        });
        push_register_op(&mut ops, &self.bass_type, |value| Mutation::SetBassType {
            value,
        });
        for (id, instr) in &self.instruments {
            push_register_op(&mut ops, &instr.volume, |value| Mutation::SetVolume {
                instrument: *id,
                value,
            });
            push_register_op(&mut ops, &instr.effect_send, |value| {
                Mutation::SetEffectSend {
                    instrument: *id,
                    value,
                }
            });
            for (row, cells) in instr.grid.iter().enumerate() {
                for (col, reg) in cells.iter().enumerate() {
                    if reg.stamp() == Stamp::zero() {
                        continue;
                    }
                    ops.push(Op {
                        mutation: Mutation::SetCell {
                            instrument: *id,
                            row: row as u16,
                            col: col as u16,
                            value: reg.value(),
                        },
                        stamp: reg.stamp(),
                    });
                }
            }
        }
        ops
    }
}

fn push_register_op<T: Copy>(
    ops: &mut Vec<Op>,
    register: &Register<T>,
    make: impl FnOnce(T) -> Mutation,
) {
    if register.stamp() != Stamp::zero() {
        ops.push(Op {
            mutation: make(register.value()),
            stamp: register.stamp(),
        });
    }
}

impl Document {
    /// Rebuilds a document from a persisted snapshot, keeping stored
    /// grid dimensions as-is (migration reconciles them afterwards).
    /// Instruments absent from the snapshot stay at seeded defaults.
    pub fn restore(replica: ReplicaId, snapshot: Snapshot, config: &TrackConfig) -> Self {
        let mut doc = Document::new(replica, config);
        doc.clock = snapshot.clock;
        doc.bpm = snapshot.bpm;
        doc.kit = snapshot.kit;
        doc.lead1_synth = snapshot.lead1_synth;
        doc.lead2_synth = snapshot.lead2_synth;
        doc.bass_type = snapshot.bass_type;
        doc.grid_width = snapshot.grid_width;
        for (id, instr) in snapshot.instruments {
            if let Some(state) = doc.instruments.get_mut(&id) {
                state.grid = instr.grid;
                state.volume = instr.volume;
                state.effect_send = instr.effect_send;
            }
        }
        doc
    }
}
