//! Model configuration and vocabulary description loading.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::errors::{BralmError, Result};

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Configuration for building an `EdgeModel`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of energy vectors and edge transforms (default: 32)
    pub hidden_size: usize,
    /// Execution target for parameters and caches (default: cpu)
    pub device: Device,
    /// Seed for random parameter initialisation (default: 42)
    pub init_seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_size: 32,
            device: Device::Cpu,
            init_seed: 42,
        }
    }
}

impl ModelConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(BralmError::InvalidHiddenSize(self.hidden_size));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vocabulary description
// ---------------------------------------------------------------------------

/// Read a `{ "<label>": index }` JSON object for dense graph construction.
pub fn load_node_dict(path: impl AsRef<Path>) -> Result<HashMap<String, usize>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Node dictionary over the distinct characters of `text`, indexed in order
/// of first appearance.
pub fn node_dict_from_text(text: &str) -> HashMap<String, usize> {
    let mut dict = HashMap::new();
    for c in text.chars() {
        let next = dict.len();
        dict.entry(c.to_string()).or_insert(next);
    }
    dict
}
