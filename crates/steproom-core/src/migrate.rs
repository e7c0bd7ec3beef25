//! Grid migration: reconciles stored grid dimensions with the current
//! track configuration.
//!
//! Runs once per successful resync (and on relay cold start). Rows are
//! only ever appended, never removed, and short rows are padded back
//! to the full stored width. New cells are seeded false under the zero
//! stamp, which makes migration commutative with concurrent cell
//! writes and idempotent by construction: a conforming grid produces
//! an empty plan.

use crate::config::{GridWidth, InstrumentId};
use crate::doc::{seeded_grid, Change, Document, Origin};
use crate::stamp::Register;

/// What one migration pass did to a single instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridGrowth {
    pub instrument: InstrumentId,
    pub rows_added: usize,
    pub cells_padded: usize,
}

/// Summary of one migration pass over the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationReport {
    pub grown: Vec<GridGrowth>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.grown.is_empty()
    }
}

impl Document {
    /// Grows every instrument grid to its configured row count and the
    /// shared column width, preserving all existing cells. Applied as
    /// one transaction tagged [`Origin::Migration`]; subscribers see a
    /// single settled batch. Running this twice without a configuration
    /// change is a no-op.
    pub fn migrate_grids(&mut self) -> MigrationReport {
        let visible = self.grid_width().columns();
        let stored = GridWidth::MAX.columns();
        let mut report = MigrationReport::default();
        let mut changes = Vec::new();

        let targets: Vec<(InstrumentId, usize)> = self
            .config
            .instruments()
            .iter()
            .map(|spec| (spec.id, spec.rows()))
            .collect();

        for (id, target_rows) in targets {
            let Some(state) = self.instruments.get_mut(&id) else {
                continue;
            };
            let mut growth = GridGrowth {
                instrument: id,
                rows_added: 0,
                cells_padded: 0,
            };

            if state.grid.len() < target_rows {
                growth.rows_added = target_rows - state.grid.len();
                let mut fresh = seeded_grid(growth.rows_added, stored);
                state.grid.append(&mut fresh);
            }

            // Pad short rows (from snapshots written before full-width
            // storage) out to the maximum width, so every addressable
            // cell has a register again.
            for row in &mut state.grid {
                if row.len() < stored {
                    growth.cells_padded += stored - row.len();
                    row.resize_with(stored, || Register::seeded(false));
                }
            }

            if growth.rows_added > 0 || growth.cells_padded > 0 {
                changes.push(Change::GridMigrated {
                    instrument: id,
                    rows: state.grid.len() as u16,
                    cols: visible as u16,
                });
                report.grown.push(growth);
            }
        }

        self.emit(Origin::Migration, changes);
        report
    }
}
