//! Energy propagation: the recurrence that replaces attention.
//!
//! Each step turns the history of energy vectors into the next one:
//!
//!   pooled = 1/hidden everywhere                          (empty history)
//!          = Σ_i softmax(position_weights[0..L])_i · cache[i]   (otherwise)
//!   next   = gelu(pooled · W_edge + b_edge + position_table[L])
//!
//! Pooling weights depend only on sequence offsets, never on content.
//! `EnergyPropagator` holds no state of its own; the only mutable data is the
//! `EnergyCache`, owned by one decode call and append-only.

use log::trace;

use crate::device::{Device, ExecutionContext};
use crate::errors::{BralmError, Result};
use crate::params::EdgeParameterStore;
use crate::position::PositionTable;
use crate::types::{EdgeId, EnergyVector};

// ---------------------------------------------------------------------------
// EnergyCache: ordered history of energy vectors
// ---------------------------------------------------------------------------

/// Append-only sequence of energy vectors; insertion order is sequence order.
#[derive(Clone, Debug)]
pub struct EnergyCache {
    device: Device,
    hidden: usize,
    entries: Vec<EnergyVector>,
}

impl EnergyCache {
    pub fn new(ctx: &ExecutionContext, hidden: usize) -> Self {
        Self { device: ctx.device(), hidden, entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn get(&self, index: usize) -> Option<&EnergyVector> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&EnergyVector> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[EnergyVector] {
        &self.entries
    }

    pub(crate) fn push(&mut self, energy: EnergyVector) -> Result<()> {
        if energy.len() != self.hidden {
            return Err(BralmError::DimensionMismatch {
                what: "energy vector",
                expected: self.hidden,
                got: energy.len(),
            });
        }
        self.entries.push(energy);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EnergyPropagator
// ---------------------------------------------------------------------------

/// The step function over `(cache, edge parameters, position data)`.
#[derive(Clone, Copy, Debug)]
pub struct EnergyPropagator<'a> {
    ctx: ExecutionContext,
    store: &'a EdgeParameterStore,
    table: &'a PositionTable,
}

impl<'a> EnergyPropagator<'a> {
    pub fn new(ctx: ExecutionContext, store: &'a EdgeParameterStore, table: &'a PositionTable) -> Result<Self> {
        ctx.ensure(store.device())?;
        if table.hidden() != store.hidden() {
            return Err(BralmError::DimensionMismatch {
                what: "position table width",
                expected: store.hidden(),
                got: table.hidden(),
            });
        }
        Ok(Self { ctx, store, table })
    }

    pub fn hidden(&self) -> usize {
        self.store.hidden()
    }

    pub fn context(&self) -> ExecutionContext {
        self.ctx
    }

    /// Fresh cache on this propagator's execution target.
    pub fn new_cache(&self) -> EnergyCache {
        EnergyCache::new(&self.ctx, self.hidden())
    }

    /// Content-free pooled vector used before any history exists.
    pub fn seed(&self) -> EnergyVector {
        vec![1.0 / self.hidden() as f64; self.hidden()]
    }

    /// Softmax of the first `len` position weights.
    pub fn pooling_weights(&self, len: usize) -> Result<Vec<f64>> {
        let weights = self.store.position_weights();
        if len > weights.len() {
            return Err(BralmError::SequenceTooLong { position: len, max: weights.len() });
        }
        Ok(self.ctx.softmax(&weights[..len]))
    }

    /// Position-weighted convex combination of the cache, or the seed vector
    /// when the cache is empty.
    pub fn pool(&self, cache: &EnergyCache) -> Result<EnergyVector> {
        self.ctx.ensure(cache.device())?;
        if cache.is_empty() {
            return Ok(self.seed());
        }
        let weights = self.pooling_weights(cache.len())?;
        let mut pooled = vec![0.0; self.hidden()];
        for (w, entry) in weights.iter().zip(cache.entries()) {
            for (p, &e) in pooled.iter_mut().zip(entry) {
                *p += w * e;
            }
        }
        Ok(pooled)
    }

    /// `gelu(pooled · W + b + position_table[position])` for one edge.
    pub fn transform(&self, pooled: &[f64], edge: EdgeId, position: usize) -> Result<EnergyVector> {
        let params = self.store.lookup(edge.group, edge.offset)?;
        let pe = self
            .table
            .row(position)
            .ok_or(BralmError::SequenceTooLong { position, max: self.table.max_len() })?;

        let mut out = self.ctx.vec_mat(pooled, &params.weight)?;
        self.ctx.add_assign(&mut out, &params.bias)?;
        self.ctx.add_assign(&mut out, pe)?;
        self.ctx.gelu_inplace(&mut out);
        Ok(out)
    }

    /// One step: compute the next energy vector for `edge`, append it to
    /// `cache` and return it.
    pub fn advance(&self, cache: &mut EnergyCache, edge: EdgeId) -> Result<EnergyVector> {
        let pooled = self.pool(cache)?;
        let position = cache.len();
        let energy = self.transform(&pooled, edge, position)?;
        trace!("advance edge {edge} at position {position}");
        cache.push(energy.clone())?;
        Ok(energy)
    }

    /// Score every candidate against the same pooled vector and position,
    /// leaving `cache` untouched. Equivalent to calling `advance` once per
    /// candidate on a copy of the cache.
    pub fn score_candidates(&self, cache: &EnergyCache, edges: &[EdgeId]) -> Result<Vec<EnergyVector>> {
        let pooled = self.pool(cache)?;
        let position = cache.len();
        edges
            .iter()
            .map(|&edge| self.transform(&pooled, edge, position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::VocabGraph;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn setup(hidden: usize) -> (VocabGraph, EdgeParameterStore, PositionTable) {
        let dict: HashMap<String, usize> =
            [("a", 0), ("b", 1), ("c", 2)].iter().map(|&(k, v)| (k.to_string(), v)).collect();
        let graph = VocabGraph::from_node_dict(&dict).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let store = EdgeParameterStore::random(&graph, hidden, &ExecutionContext::cpu(), &mut rng).unwrap();
        let table = PositionTable::encode(crate::position::MAX_POSITIONS, hidden);
        (graph, store, table)
    }

    #[test]
    fn test_empty_cache_pools_to_seed() {
        let (_, store, table) = setup(4);
        let prop = EnergyPropagator::new(ExecutionContext::cpu(), &store, &table).unwrap();
        let pooled = prop.pool(&prop.new_cache()).unwrap();
        assert_eq!(pooled, vec![0.25; 4]);
    }

    #[test]
    fn test_cache_grows_one_per_advance() {
        let (graph, store, table) = setup(3);
        let prop = EnergyPropagator::new(ExecutionContext::cpu(), &store, &table).unwrap();
        let mut cache = prop.new_cache();
        for (i, edge) in graph.edges().take(5).enumerate() {
            let v = prop.advance(&mut cache, edge).unwrap();
            assert_eq!(cache.len(), i + 1);
            assert_eq!(cache.last(), Some(&v));
        }
    }

    #[test]
    fn test_batched_scoring_matches_advance() {
        let (graph, store, table) = setup(3);
        let prop = EnergyPropagator::new(ExecutionContext::cpu(), &store, &table).unwrap();
        let mut cache = prop.new_cache();
        prop.advance(&mut cache, EdgeId::new(0, 1)).unwrap();
        prop.advance(&mut cache, EdgeId::new(1, 2)).unwrap();

        let candidates = graph.edges_of_node(2).unwrap();
        let batched = prop.score_candidates(&cache, &candidates).unwrap();
        assert_eq!(cache.len(), 2);
        for (edge, scored) in candidates.iter().zip(&batched) {
            let mut copy = cache.clone();
            let single = prop.advance(&mut copy, *edge).unwrap();
            assert_eq!(&single, scored);
        }
    }

    #[test]
    fn test_rejects_cache_from_other_device() {
        let (_, store, table) = setup(2);
        let prop = EnergyPropagator::new(ExecutionContext::cpu(), &store, &table).unwrap();
        let foreign = EnergyCache::new(&ExecutionContext::new(Device::Accelerator(0)), 2);
        assert!(matches!(prop.pool(&foreign), Err(BralmError::DeviceMismatch { .. })));
    }
}
