//! BraLM: edge-graph character language model, inference only.
//!
//! Tokens are edges of a graph over characters: a step predicts which
//! character follows the current one. Each edge owns a learned transform;
//! a position-only softmax pooling over past energy vectors replaces
//! attention.
//!
//! Architecture:
//!   - vocab:    VocabGraph - nodes, edges, `(group, offset)` ids
//!   - params:   EdgeParameterStore - per-edge weight/bias, position weights
//!   - position: PositionTable - fixed sinusoidal encodings
//!   - energy:   EnergyPropagator - pooling + per-edge transform + GELU
//!   - decoder:  Decoder - prefix ingestion, then fixed-length generation
//!   - model:    EdgeModel - text in, text out

pub mod errors;
pub mod types;
pub mod device;
pub mod config;
pub mod vocab;
pub mod params;
pub mod position;
pub mod energy;
pub mod sampling;
pub mod decoder;
pub mod model;

pub use config::ModelConfig;
pub use decoder::{DecodeOutput, Decoder};
pub use device::{Device, ExecutionContext};
pub use energy::{EnergyCache, EnergyPropagator};
pub use errors::{BralmError, Result};
pub use model::EdgeModel;
pub use params::{EdgeParameterStore, EdgeParams, ParameterSet};
pub use position::PositionTable;
pub use sampling::{DecodeConfig, GenerationResult};
pub use types::{EdgeId, Matrix, NodeId};
pub use vocab::{NeighborLimit, VocabGraph};
