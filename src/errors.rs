//! BraLM error types.

use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum BralmError {
    #[error("InvalidVocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("MalformedEdge: expected `source->target`, got {0:?}")]
    MalformedEdge(String),

    #[error("UnknownEdgeId: ({group}, {offset}) was never registered")]
    UnknownEdgeId { group: usize, offset: usize },

    #[error("UnknownNode: index {0} is not in the vocabulary")]
    UnknownNode(usize),

    /// An edge the graph can produce has no stored parameters.
    #[error("ParameterMismatch: no parameters for edge ({group}, {offset})")]
    ParameterMismatch { group: usize, offset: usize },

    /// Stored parameters for an edge the graph never registered.
    #[error("StrayParameters: edge ({group}, {offset}) is not in the vocabulary")]
    StrayParameters { group: usize, offset: usize },

    #[error("InvalidHiddenSize: hidden size must be at least 1, got {0}")]
    InvalidHiddenSize(usize),

    #[error("NonFiniteParameters: {what} contains NaN or infinity")]
    NonFiniteParameters { what: String },

    #[error("DimensionMismatch: {what}: expected {expected}, got {got}")]
    DimensionMismatch { what: &'static str, expected: usize, got: usize },

    #[error("DeviceMismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    #[error("InvalidDevice: {0:?}")]
    InvalidDevice(String),

    #[error("DeadEnd: node {node:?} has no outgoing edge besides its self-loop")]
    DeadEnd { node: String },

    #[error("InvalidTemperature: temperature must be finite and > 0, got {0}")]
    InvalidTemperature(f64),

    #[error("PromptTooShort: need at least 2 characters, got {0}")]
    PromptTooShort(usize),

    #[error("EmptyPrefix: decoding needs at least one prefix edge")]
    EmptyPrefix,

    #[error("SequenceTooLong: position {position} exceeds the {max} supported positions")]
    SequenceTooLong { position: usize, max: usize },

    #[error("SamplingError: {0}")]
    Sampling(String),

    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    #[error("JsonError: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BralmError>;
