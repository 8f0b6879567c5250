//! Core BraLM types: NodeId, EdgeId, EnergyVector, Matrix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{BralmError, Result};

// ---------------------------------------------------------------------------
// NodeId / EdgeId
// ---------------------------------------------------------------------------

/// Dense index of a character node.
pub type NodeId = usize;

/// Stable edge identifier: `group` is the source node's index, `offset` the
/// target's rank among that source's registered outgoing edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub group: usize,
    pub offset: usize,
}

impl EdgeId {
    /// Fallback id returned for any unregistered lookup.
    pub const UNKNOWN: EdgeId = EdgeId { group: 0, offset: 0 };

    pub const fn new(group: usize, offset: usize) -> Self {
        Self { group, offset }
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.group, self.offset)
    }
}

// ---------------------------------------------------------------------------
// EnergyVector
// ---------------------------------------------------------------------------

/// Per-step `1 × hidden` state produced by the energy recurrence.
pub type EnergyVector = Vec<f64>;

// ---------------------------------------------------------------------------
// Matrix: square transform (f64, row-major)
// ---------------------------------------------------------------------------

/// A `dim × dim` matrix stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    pub dim: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(dim: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != dim * dim {
            return Err(BralmError::DimensionMismatch {
                what: "weight matrix",
                expected: dim * dim,
                got: data.len(),
            });
        }
        Ok(Self { dim, data })
    }

    pub fn zeros(dim: usize) -> Self {
        Self { dim, data: vec![0.0; dim * dim] }
    }

    pub fn identity(dim: usize) -> Self {
        let mut m = Self::zeros(dim);
        for i in 0..dim {
            m.data[i * dim + i] = 1.0;
        }
        m
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            dim: self.dim,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix({}x{})", self.dim, self.dim)
    }
}
