//! Decode request configuration and next-edge selection.
//!
//! Provides the decode configuration, the generation result type,
//! and the selection utilities (softmax, temperature, arg-max,
//! categorical draw) used by the decoder.

use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;

use crate::errors::{BralmError, Result};
use crate::types::EdgeId;

// ---------------------------------------------------------------------------
// DecodeConfig
// ---------------------------------------------------------------------------

/// Configuration for one decode request.
#[derive(Clone, Debug)]
pub struct DecodeConfig {
    /// Number of edges generated after the prefix. There is no stop token.
    pub max_new_tokens: usize,
    /// If true, draw from the distribution. If false, pick arg-max.
    pub do_sample: bool,
    /// Probabilities are divided by this after softmax. Must be > 0.
    pub temperature: f64,
    /// Seed for the random source used by `EdgeModel::generate`.
    pub seed: Option<u64>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 16,
            do_sample: false,
            temperature: 1.0,
            seed: None,
        }
    }
}

impl DecodeConfig {
    pub fn greedy(max_new_tokens: usize) -> Self {
        Self { max_new_tokens, ..Self::default() }
    }

    pub fn sampled(max_new_tokens: usize, seed: u64) -> Self {
        Self {
            max_new_tokens,
            do_sample: true,
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Reject requests that cannot be decoded before any compute happens.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(BralmError::InvalidTemperature(self.temperature));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GeneratedStep / GenerationResult
// ---------------------------------------------------------------------------

/// Record of one generation step.
#[derive(Clone, Debug)]
pub struct GeneratedStep {
    /// Candidate edges in scoring order.
    pub candidates: Vec<EdgeId>,
    /// Selection weights over `candidates` (after temperature).
    pub probabilities: Vec<f64>,
    /// Index into `candidates` of the chosen edge.
    pub chosen: usize,
    /// L2 norm of the chosen candidate's energy vector.
    pub energy: f64,
}

impl GeneratedStep {
    pub fn edge(&self) -> EdgeId {
        self.candidates[self.chosen]
    }
}

/// Result of text generation.
#[derive(Clone, Debug)]
pub struct GenerationResult {
    pub prompt: String,
    /// Decoded text of the whole edge sequence, prefix included.
    pub text: String,
    /// Decoded targets of the generated edges only.
    pub continuation: String,
    pub edges: Vec<EdgeId>,
    pub steps: Vec<GeneratedStep>,
}

impl GenerationResult {
    /// Average chosen-candidate energy magnitude across generated steps.
    pub fn avg_energy(&self) -> f64 {
        if self.steps.is_empty() { return 0.0; }
        self.steps.iter().map(|s| s.energy).sum::<f64>() / self.steps.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Utility functions
// ---------------------------------------------------------------------------

/// Softmax function.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() { return vec![]; }
    let max_score = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_score == f64::INFINITY {
        // all mass on the infinite scores
        let n = scores.iter().filter(|&&s| s == f64::INFINITY).count() as f64;
        return scores.iter().map(|&s| if s == f64::INFINITY { 1.0 / n } else { 0.0 }).collect();
    }
    let exps: Vec<f64> = scores.iter().map(|&s| (s - max_score).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / scores.len() as f64; scores.len()]
    }
}

/// Divide probabilities by `temperature` when it differs from 1.
///
/// This is a plain division after softmax, not a logit rescale: the result
/// no longer sums to 1, and both arg-max and the (renormalising) categorical
/// draw are unaffected by it.
pub fn apply_temperature(probs: &mut [f64], temperature: f64) {
    if temperature != 1.0 {
        for p in probs.iter_mut() {
            *p /= temperature;
        }
    }
}

/// Index of the largest value; the first occurrence wins ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Draw an index with probability proportional to `weights`.
pub fn sample_index(weights: &[f64], rng: &mut dyn RngCore) -> Result<usize> {
    let dist = WeightedIndex::new(weights).map_err(|e| BralmError::Sampling(e.to_string()))?;
    Ok(dist.sample(rng))
}
