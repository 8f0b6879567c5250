//! Autoregressive decoding over the vocabulary graph.
//!
//! Phase 1 feeds the prefix edges through the energy recurrence.
//! Phase 2 runs exactly `max_new_tokens` steps; each step scores every
//! outgoing edge of the current node (self-loop excluded) by the L2 norm of
//! its candidate energy vector, picks one (arg-max or sampled), and appends
//! it. There is no stop token.

use log::trace;
use rand::RngCore;

use crate::energy::{EnergyCache, EnergyPropagator};
use crate::errors::{BralmError, Result};
use crate::sampling::{apply_temperature, argmax, sample_index, DecodeConfig, GeneratedStep};
use crate::types::{EdgeId, NodeId};
use crate::vocab::{NeighborLimit, VocabGraph};

// ---------------------------------------------------------------------------
// DecodeOutput
// ---------------------------------------------------------------------------

/// Result of one decode call.
#[derive(Clone, Debug)]
pub struct DecodeOutput {
    /// Prefix edges followed by the generated edges.
    pub edges: Vec<EdgeId>,
    /// One record per generated edge.
    pub steps: Vec<GeneratedStep>,
    /// Energy history; one vector per entry of `edges`.
    pub cache: EnergyCache,
}

impl DecodeOutput {
    pub fn generated(&self) -> &[EdgeId] {
        &self.edges[self.edges.len() - self.steps.len()..]
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Decoder<'a> {
    graph: &'a VocabGraph,
    propagator: EnergyPropagator<'a>,
}

impl<'a> Decoder<'a> {
    pub fn new(graph: &'a VocabGraph, propagator: EnergyPropagator<'a>) -> Self {
        Self { graph, propagator }
    }

    /// Ingest `prefix`, then generate `config.max_new_tokens` edges.
    ///
    /// All-or-nothing: any failure aborts the call and no partial output is
    /// returned.
    pub fn decode(
        &self,
        prefix: &[EdgeId],
        config: &DecodeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<DecodeOutput> {
        config.validate()?;
        let &last = prefix.last().ok_or(BralmError::EmptyPrefix)?;

        let mut cache = self.propagator.new_cache();
        let mut edges = Vec::with_capacity(prefix.len() + config.max_new_tokens);
        for &edge in prefix {
            self.graph.endpoints(edge)?;
            self.propagator.advance(&mut cache, edge)?;
            edges.push(edge);
        }

        let mut node = self.graph.target(last)?;
        let mut steps = Vec::with_capacity(config.max_new_tokens);
        for _ in 0..config.max_new_tokens {
            let step = self.step(&mut cache, node, config, rng)?;
            let edge = step.edge();
            node = self.graph.target(edge)?;
            edges.push(edge);
            steps.push(step);
        }

        Ok(DecodeOutput { edges, steps, cache })
    }

    /// Score the outgoing edges of `node`, select one and append its energy
    /// vector to `cache`.
    fn step(
        &self,
        cache: &mut EnergyCache,
        node: NodeId,
        config: &DecodeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<GeneratedStep> {
        let candidates = self.graph.neighbors_of_node(node, NeighborLimit::All)?;
        if candidates.is_empty() {
            return Err(self.dead_end(node));
        }

        let mut energies = self.propagator.score_candidates(cache, &candidates)?;
        let ctx = self.propagator.context();
        let scores: Vec<f64> = energies.iter().map(|e| ctx.l2_norm(e)).collect();

        let mut probabilities = ctx.softmax(&scores);
        apply_temperature(&mut probabilities, config.temperature);

        let chosen = if config.do_sample {
            sample_index(&probabilities, rng)?
        } else {
            argmax(&probabilities).ok_or_else(|| self.dead_end(node))?
        };

        trace!(
            "position {}: {} candidates, chose {} (p={:.4})",
            cache.len(),
            candidates.len(),
            candidates[chosen],
            probabilities[chosen]
        );

        let energy = scores[chosen];
        cache.push(energies.swap_remove(chosen))?;
        Ok(GeneratedStep { candidates, probabilities, chosen, energy })
    }

    fn dead_end(&self, node: NodeId) -> BralmError {
        BralmError::DeadEnd {
            node: self.graph.node_label(node).unwrap_or_default().to_string(),
        }
    }
}
