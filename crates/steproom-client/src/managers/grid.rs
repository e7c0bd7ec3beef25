//! Grid sync manager: per-cell toggles, bulk writes and the shared
//! width control.

use steproom_core::{Change, GridWidth, InstrumentId, Mutation, Origin, SubscriptionId};
use tracing::warn;

use crate::handle::DocHandle;

pub struct GridSync {
    handle: DocHandle,
}

impl GridSync {
    pub fn new(handle: DocHandle) -> Self {
        Self { handle }
    }

    /// Materialized boolean matrix for one instrument.
    pub fn grid(&self, instrument: InstrumentId) -> Vec<Vec<bool>> {
        self.handle.with_doc(move |doc| doc.grid(instrument))
    }

    /// Cell state; out-of-bounds coordinates read as inactive.
    pub fn is_active(&self, instrument: InstrumentId, row: usize, col: usize) -> bool {
        self.handle.with_doc(move |doc| doc.cell(instrument, row, col))
    }

    pub fn width(&self) -> GridWidth {
        self.handle.with_doc(|doc| doc.grid_width())
    }

    /// Flips one cell: read the current boolean, invert it, write it
    /// back - all inside one local transaction so a concurrent remote
    /// batch cannot interleave between read and write. Writes outside
    /// the visible grid (a row missing mid-migration, or a column past
    /// the shared width) are skipped with a warning rather than
    /// crashing the caller.
    pub fn toggle_cell(&self, instrument: InstrumentId, row: usize, col: usize) {
        self.handle.transact(move |doc| {
            let (rows, cols) = doc.grid_dimensions(instrument);
            if row >= rows || col >= cols {
                warn!(%instrument, row, col, "toggle outside visible grid, skipping");
                return Vec::new();
            }
            let value = !doc.cell(instrument, row, col);
            vec![Mutation::SetCell {
                instrument,
                row: row as u16,
                col: col as u16,
                value,
            }]
        });
    }

    pub fn set_cell(&self, instrument: InstrumentId, row: usize, col: usize, value: bool) {
        self.handle.transact(move |doc| {
            let (rows, cols) = doc.grid_dimensions(instrument);
            if row >= rows || col >= cols {
                warn!(%instrument, row, col, "cell write outside visible grid, skipping");
                return Vec::new();
            }
            vec![Mutation::SetCell {
                instrument,
                row: row as u16,
                col: col as u16,
                value,
            }]
        });
    }

    /// Overwrites an instrument's grid in one transaction. Only cells
    /// that actually differ are written, and only within the visible
    /// bounds; excess rows or columns in the input are ignored.
    pub fn set_grid(&self, instrument: InstrumentId, grid: &[Vec<bool>]) {
        let grid = grid.to_vec();
        self.handle.transact(move |doc| {
            let current = doc.grid(instrument);
            let mut mutations = Vec::new();
            for (row, cells) in grid.iter().enumerate().take(current.len()) {
                for (col, &value) in cells.iter().enumerate().take(current[row].len()) {
                    if current[row][col] != value {
                        mutations.push(Mutation::SetCell {
                            instrument,
                            row: row as u16,
                            col: col as u16,
                            value,
                        });
                    }
                }
            }
            mutations
        });
    }

    /// Switches the shared column count. Every instrument resizes
    /// together; shrinking hides the tail columns without clearing
    /// them, so expanding again brings their cells back.
    pub fn resize_grid(&self, width: GridWidth) {
        self.handle
            .mutate(vec![Mutation::SetGridWidth { value: width }]);
    }

    /// Fires one discrete `(instrument, row, col, value)` event per
    /// non-local cell change, in position order even when a remote
    /// batch touches a consecutive run of cells.
    pub fn on_cell_change<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(InstrumentId, usize, usize, bool) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                if let Change::Cell {
                    instrument,
                    row,
                    col,
                    value,
                } = change
                {
                    callback(*instrument, *row as usize, *col as usize, *value);
                }
            }
        })
    }

    /// Fires when the shared width changes (from any origin except
    /// local) or when migration reshapes a grid; consumers typically
    /// re-render the whole grid on either.
    pub fn on_reshape<F>(&self, mut callback: F) -> SubscriptionId
    where
        F: FnMut(GridWidth) + Send + 'static,
    {
        self.handle.subscribe(move |batch| {
            if batch.origin == Origin::Local {
                return;
            }
            for change in &batch.changes {
                match change {
                    Change::GridWidth { value } => callback(*value),
                    Change::GridMigrated { cols, .. } => {
                        if let Some(width) = GridWidth::from_columns(*cols as usize) {
                            callback(width);
                        }
                    }
                    _ => {}
                }
            }
        })
    }
}
