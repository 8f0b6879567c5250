//! Execution target and the numeric kernels every compute call routes through.
//!
//! The target is an explicit value: the parameter store and each energy cache
//! record the target they were built for, and every kernel call checks the
//! operands against the context before computing. Mixing targets is a
//! configuration error reported at the first mismatched operation.
//!
//! Only the host kernels are built in; accelerator identifiers are placement
//! tags that keep store and cache consistent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{BralmError, Result};
use crate::sampling::softmax;
use crate::types::Matrix;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Opaque execution target identifier, e.g. `cpu` or `cuda:0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(n) => write!(f, "accelerator:{n}"),
        }
    }
}

impl FromStr for Device {
    type Err = BralmError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        let (kind, ordinal) = s
            .split_once(':')
            .ok_or_else(|| BralmError::InvalidDevice(s.clone()))?;
        match kind {
            "cuda" | "accelerator" => ordinal
                .parse::<u32>()
                .map(Self::Accelerator)
                .map_err(|_| BralmError::InvalidDevice(s.clone())),
            _ => Err(BralmError::InvalidDevice(s.clone())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = BralmError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Device> for String {
    fn from(d: Device) -> Self {
        d.to_string()
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Execution context threaded through store/cache construction and every
/// compute call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    device: Device,
}

impl ExecutionContext {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Fail if `other` lives on a different target than this context.
    pub fn ensure(&self, other: Device) -> Result<()> {
        if other != self.device {
            return Err(BralmError::DeviceMismatch { expected: self.device, got: other });
        }
        Ok(())
    }

    /// Row vector times square matrix: `out[j] = Σ_i v[i] · m[i, j]`.
    pub fn vec_mat(&self, v: &[f64], m: &Matrix) -> Result<Vec<f64>> {
        if v.len() != m.dim {
            return Err(BralmError::DimensionMismatch {
                what: "vector x matrix",
                expected: m.dim,
                got: v.len(),
            });
        }
        let mut out = vec![0.0; m.dim];
        for (i, &vi) in v.iter().enumerate() {
            for (o, &w) in out.iter_mut().zip(m.row(i)) {
                *o += vi * w;
            }
        }
        Ok(out)
    }

    /// Elementwise `a + b`, in place on `a`.
    pub fn add_assign(&self, a: &mut [f64], b: &[f64]) -> Result<()> {
        if a.len() != b.len() {
            return Err(BralmError::DimensionMismatch {
                what: "elementwise add",
                expected: a.len(),
                got: b.len(),
            });
        }
        for (x, y) in a.iter_mut().zip(b) {
            *x += y;
        }
        Ok(())
    }

    pub fn gelu_inplace(&self, v: &mut [f64]) {
        for x in v.iter_mut() {
            *x = gelu(*x);
        }
    }

    pub fn softmax(&self, scores: &[f64]) -> Vec<f64> {
        softmax(scores)
    }

    pub fn l2_norm(&self, v: &[f64]) -> f64 {
        v.iter().map(|x| x * x).sum::<f64>().sqrt()
    }
}

/// Exact GELU: `x · Φ(x)`.
pub fn gelu(x: f64) -> f64 {
    0.5 * x * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}
