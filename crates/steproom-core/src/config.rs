//! Track configuration: the closed set of instruments, their grid row
//! layout and default mix, plus the closed value sets for kit, synth
//! and bass presets.
//!
//! Grid columns are deliberately absent here - the column count is a
//! single shared register on the document ([`GridWidth`]) and every
//! instrument resizes together.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The distinguished room id holding the lobby index of all other rooms.
pub const REGISTRY_ROOM_ID: &str = "rooms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentId {
    Drums,
    Lead1,
    Lead2,
    Bass,
}

impl InstrumentId {
    pub const ALL: [InstrumentId; 4] = [
        InstrumentId::Drums,
        InstrumentId::Lead1,
        InstrumentId::Lead2,
        InstrumentId::Bass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentId::Drums => "drums",
            InstrumentId::Lead1 => "lead1",
            InstrumentId::Lead2 => "lead2",
            InstrumentId::Bass => "bass",
        }
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two lead tracks a synth preset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSlot {
    Lead1,
    Lead2,
}

impl LeadSlot {
    pub fn instrument(&self) -> InstrumentId {
        match self {
            LeadSlot::Lead1 => InstrumentId::Lead1,
            LeadSlot::Lead2 => InstrumentId::Lead2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KitName {
    KitA,
    KitB,
    KitC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthPreset {
    Analog,
    Fm,
    Am,
    Membrane,
    Duo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BassPreset {
    Square,
    Sawtooth,
    Triangle,
}

/// Shared grid column count. All instruments resize together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridWidth {
    Sixteen,
    ThirtyTwo,
}

impl GridWidth {
    /// Widest selectable grid. Stored rows keep this many cell
    /// registers regardless of the visible width, so shrinking never
    /// discards a stamped cell.
    pub const MAX: GridWidth = GridWidth::ThirtyTwo;

    pub const fn columns(&self) -> usize {
        match self {
            GridWidth::Sixteen => 16,
            GridWidth::ThirtyTwo => 32,
        }
    }

    pub fn from_columns(columns: usize) -> Option<Self> {
        match columns {
            16 => Some(GridWidth::Sixteen),
            32 => Some(GridWidth::ThirtyTwo),
            _ => None,
        }
    }
}

impl Serialize for GridWidth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.columns() as u64)
    }
}

impl<'de> Deserialize<'de> for GridWidth {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let columns = u64::deserialize(deserializer)?;
        GridWidth::from_columns(columns as usize)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid grid width: {columns}")))
    }
}

const DRUM_ROWS: &[&str] = &[
    "kick", "snare", "hihat", "openhat", "clap", "boom", "ride", "tink",
];

const LEAD_ROWS: &[&str] = &[
    "C4", "C#4", "D4", "D#4", "E4", "F4", "F#4", "G4", "G#4", "A4", "A#4", "B4", "C5", "C#5",
    "D5", "D#5", "E5", "F5", "F#5", "G5", "G#5", "A5", "A#5", "B5", "C6",
];

const BASS_ROWS: &[&str] = &[
    "C2", "C#2", "D2", "D#2", "E2", "F2", "F#2", "G2", "G#2", "A2", "A#2", "B2", "C3",
];

/// Static description of one track: its row layout and default mix.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub id: InstrumentId,
    pub name: &'static str,
    pub row_labels: &'static [&'static str],
    pub default_volume: f64,
    pub default_effect_send: f64,
}

impl InstrumentSpec {
    pub fn rows(&self) -> usize {
        self.row_labels.len()
    }
}

/// The compiled-in track configuration. Stored grids whose dimensions
/// disagree with this are reconciled by grid migration after resync.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    instruments: Vec<InstrumentSpec>,
}

impl TrackConfig {
    pub fn standard() -> Self {
        Self {
            instruments: vec![
                InstrumentSpec {
                    id: InstrumentId::Drums,
                    name: "Drums",
                    row_labels: DRUM_ROWS,
                    default_volume: 0.7,
                    default_effect_send: 0.0,
                },
                InstrumentSpec {
                    id: InstrumentId::Lead1,
                    name: "Lead 1",
                    row_labels: LEAD_ROWS,
                    default_volume: 0.5,
                    default_effect_send: 0.0,
                },
                InstrumentSpec {
                    id: InstrumentId::Lead2,
                    name: "Lead 2",
                    row_labels: LEAD_ROWS,
                    default_volume: 0.5,
                    default_effect_send: 0.0,
                },
                InstrumentSpec {
                    id: InstrumentId::Bass,
                    name: "Bass",
                    row_labels: BASS_ROWS,
                    default_volume: 0.6,
                    default_effect_send: 0.0,
                },
            ],
        }
    }

    pub fn instruments(&self) -> &[InstrumentSpec] {
        &self.instruments
    }

    pub fn get(&self, id: InstrumentId) -> Option<&InstrumentSpec> {
        self.instruments.iter().find(|spec| spec.id == id)
    }

    /// Configured row count; an instrument missing from the config has
    /// zero rows.
    pub fn rows(&self, id: InstrumentId) -> usize {
        self.get(id).map(InstrumentSpec::rows).unwrap_or(0)
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_row_counts() {
        let config = TrackConfig::standard();
        assert_eq!(config.rows(InstrumentId::Drums), 8);
        assert_eq!(config.rows(InstrumentId::Lead1), 25);
        assert_eq!(config.rows(InstrumentId::Lead2), 25);
        assert_eq!(config.rows(InstrumentId::Bass), 13);
    }

    #[test]
    fn grid_width_serializes_as_column_count() {
        let json = serde_json::to_string(&GridWidth::ThirtyTwo).unwrap();
        assert_eq!(json, "32");
        let back: GridWidth = serde_json::from_str("16").unwrap();
        assert_eq!(back, GridWidth::Sixteen);
        assert!(serde_json::from_str::<GridWidth>("20").is_err());
    }

    #[test]
    fn instrument_ids_round_trip_as_snake_case() {
        let json = serde_json::to_string(&InstrumentId::Lead1).unwrap();
        assert_eq!(json, "\"lead1\"");
        let back: InstrumentId = serde_json::from_str("\"drums\"").unwrap();
        assert_eq!(back, InstrumentId::Drums);
    }
}
