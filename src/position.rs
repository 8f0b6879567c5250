//! Fixed sinusoidal position table.
//!
//!   table[p, 2d]   = sin(p / 10000^(2d / hidden))
//!   table[p, 2d+1] = cos(p / 10000^(2d / hidden))
//!
//! Not learned. Computed once per hidden size and shared by every decode.

/// Number of positions the model supports.
pub const MAX_POSITIONS: usize = 512;

const BASE: f64 = 10000.0;

// ---------------------------------------------------------------------------
// PositionTable
// ---------------------------------------------------------------------------

/// Immutable `max_len × hidden` table, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionTable {
    max_len: usize,
    hidden: usize,
    data: Vec<f64>,
}

impl PositionTable {
    /// Build the table for offsets `0..max_len`.
    pub fn encode(max_len: usize, hidden: usize) -> Self {
        let mut data = vec![0.0; max_len * hidden];
        for p in 0..max_len {
            let row = &mut data[p * hidden..(p + 1) * hidden];
            for d in (0..hidden).step_by(2) {
                let angle = p as f64 / BASE.powf(d as f64 / hidden as f64);
                row[d] = angle.sin();
                if d + 1 < hidden {
                    row[d + 1] = angle.cos();
                }
            }
        }
        Self { max_len, hidden, data }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    /// Row for `position`, or `None` past the end of the table.
    pub fn row(&self, position: usize) -> Option<&[f64]> {
        if position >= self.max_len {
            return None;
        }
        Some(&self.data[position * self.hidden..(position + 1) * self.hidden])
    }
}
