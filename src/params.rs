//! Edge parameter store: the model's learned tensors.
//!
//! One `hidden × hidden` weight matrix and one `1 × hidden` bias per edge id,
//! held as a ragged arena: `groups[group][offset]`. Also holds the learned
//! per-position pooling weights.
//!
//! Stores are built once against a `VocabGraph` and are immutable afterwards.
//! Every construction path checks totality: each edge the graph can produce
//! has exactly one parameter pair of the right shape.
//!
//! On-disk format (JSON, one or more parts merged in order):
//!   { "hidden": 32,
//!     "edges": [ { "group": 0, "offset": 0, "weight": [..], "bias": [..] } ],
//!     "positions": [..] }

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::device::{Device, ExecutionContext};
use crate::errors::{BralmError, Result};
use crate::position::MAX_POSITIONS;
use crate::types::{EdgeId, Matrix};
use crate::vocab::VocabGraph;

/// Parameters are drawn from `[-INIT_RANGE, INIT_RANGE)` at initialisation.
pub const INIT_RANGE: f64 = 0.5;

// ---------------------------------------------------------------------------
// EdgeParams
// ---------------------------------------------------------------------------

/// Transform of a single edge: `x · weight + bias`.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeParams {
    pub weight: Matrix,
    pub bias: Vec<f64>,
}

impl EdgeParams {
    pub fn new(weight: Matrix, bias: Vec<f64>) -> Result<Self> {
        if bias.len() != weight.dim {
            return Err(BralmError::DimensionMismatch {
                what: "bias",
                expected: weight.dim,
                got: bias.len(),
            });
        }
        Ok(Self { weight, bias })
    }

    pub fn hidden(&self) -> usize {
        self.weight.dim
    }
}

// ---------------------------------------------------------------------------
// EdgeParameterStore
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EdgeParameterStore {
    hidden: usize,
    device: Device,
    groups: Vec<Vec<EdgeParams>>,
    position_weights: Vec<f64>,
}

impl EdgeParameterStore {
    /// Fresh parameters, every value uniform in `[-0.5, 0.5)`; position
    /// weights start at 1.0.
    pub fn random<R: Rng + ?Sized>(
        graph: &VocabGraph,
        hidden: usize,
        ctx: &ExecutionContext,
        rng: &mut R,
    ) -> Result<Self> {
        check_hidden(hidden)?;
        let groups = (0..graph.num_groups())
            .map(|g| {
                (0..graph.group_len(g))
                    .map(|_| EdgeParams {
                        weight: Matrix {
                            dim: hidden,
                            data: (0..hidden * hidden)
                                .map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE))
                                .collect(),
                        },
                        bias: (0..hidden).map(|_| rng.gen_range(-INIT_RANGE..INIT_RANGE)).collect(),
                    })
                    .collect()
            })
            .collect();

        debug!(
            "initialised {} edge parameter pairs (hidden={}) on {}",
            graph.num_edges(),
            hidden,
            ctx.device()
        );
        Ok(Self {
            hidden,
            device: ctx.device(),
            groups,
            position_weights: vec![1.0; MAX_POSITIONS],
        })
    }

    /// Build a store by asking `f` for every edge of `graph`.
    pub fn from_fn<F>(graph: &VocabGraph, hidden: usize, ctx: &ExecutionContext, mut f: F) -> Result<Self>
    where
        F: FnMut(EdgeId) -> EdgeParams,
    {
        check_hidden(hidden)?;
        let mut groups = Vec::with_capacity(graph.num_groups());
        for g in 0..graph.num_groups() {
            let mut group = Vec::with_capacity(graph.group_len(g));
            for o in 0..graph.group_len(g) {
                let edge = EdgeId::new(g, o);
                let params = f(edge);
                check_params(&params, hidden, edge)?;
                group.push(params);
            }
            groups.push(group);
        }
        Ok(Self {
            hidden,
            device: ctx.device(),
            groups,
            position_weights: vec![1.0; MAX_POSITIONS],
        })
    }

    /// Merge partial parameter sets in order (later parts win on id
    /// collision) and check the result against `graph`.
    pub fn from_parts<I>(graph: &VocabGraph, hidden: usize, parts: I, ctx: &ExecutionContext) -> Result<Self>
    where
        I: IntoIterator<Item = ParameterSet>,
    {
        check_hidden(hidden)?;
        let mut merged: BTreeMap<EdgeId, EdgeTensor> = BTreeMap::new();
        let mut positions: Option<Vec<f64>> = None;

        for (i, part) in parts.into_iter().enumerate() {
            if part.hidden != hidden {
                return Err(BralmError::DimensionMismatch {
                    what: "parameter part hidden size",
                    expected: hidden,
                    got: part.hidden,
                });
            }
            for tensor in part.edges {
                let id = EdgeId::new(tensor.group, tensor.offset);
                if merged.insert(id, tensor).is_some() {
                    debug!("parameter part {i} overrides edge {id}");
                }
            }
            if part.positions.is_some() {
                positions = part.positions;
            }
        }

        let mut groups = Vec::with_capacity(graph.num_groups());
        for g in 0..graph.num_groups() {
            let mut group = Vec::with_capacity(graph.group_len(g));
            for o in 0..graph.group_len(g) {
                let tensor = merged
                    .remove(&EdgeId::new(g, o))
                    .ok_or(BralmError::ParameterMismatch { group: g, offset: o })?;
                let params = EdgeParams::new(Matrix::new(hidden, tensor.weight)?, tensor.bias)?;
                check_params(&params, hidden, EdgeId::new(g, o))?;
                group.push(params);
            }
            groups.push(group);
        }
        if let Some((id, _)) = merged.into_iter().next() {
            return Err(BralmError::StrayParameters { group: id.group, offset: id.offset });
        }

        let store = Self {
            hidden,
            device: ctx.device(),
            groups,
            position_weights: vec![1.0; MAX_POSITIONS],
        };
        match positions {
            Some(p) => store.with_position_weights(p),
            None => {
                debug!("no position weights in parameter parts, using uniform weights");
                Ok(store)
            }
        }
    }

    /// Load and merge parameter files.
    pub fn load<P: AsRef<Path>>(
        graph: &VocabGraph,
        hidden: usize,
        paths: &[P],
        ctx: &ExecutionContext,
    ) -> Result<Self> {
        let parts = paths
            .iter()
            .map(ParameterSet::load)
            .collect::<Result<Vec<_>>>()?;
        Self::from_parts(graph, hidden, parts, ctx)
    }

    /// Replace the pooling weights. Needs one weight per supported position.
    pub fn with_position_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() < MAX_POSITIONS {
            return Err(BralmError::DimensionMismatch {
                what: "position weights",
                expected: MAX_POSITIONS,
                got: weights.len(),
            });
        }
        if !weights.iter().all(|w| w.is_finite()) {
            return Err(BralmError::NonFiniteParameters { what: "position weights".into() });
        }
        self.position_weights = weights;
        Ok(self)
    }

    /// Parameters of edge `(group, offset)`.
    ///
    /// A miss means the store was built for a different graph and aborts
    /// the caller.
    pub fn lookup(&self, group: usize, offset: usize) -> Result<&EdgeParams> {
        self.groups
            .get(group)
            .and_then(|g| g.get(offset))
            .ok_or(BralmError::ParameterMismatch { group, offset })
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn position_weights(&self) -> &[f64] {
        &self.position_weights
    }

    pub fn num_edges(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Check that every edge of `graph` has parameters here and nothing
    /// else does.
    pub fn check_against(&self, graph: &VocabGraph) -> Result<()> {
        for edge in graph.edges() {
            self.lookup(edge.group, edge.offset)?;
        }
        for (g, ps) in self.groups.iter().enumerate() {
            if ps.len() > graph.group_len(g) {
                return Err(BralmError::StrayParameters { group: g, offset: graph.group_len(g) });
            }
        }
        Ok(())
    }

    pub fn covers(&self, graph: &VocabGraph) -> bool {
        self.check_against(graph).is_ok()
    }

    pub fn to_parameter_set(&self) -> ParameterSet {
        let edges = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(g, ps)| {
                ps.iter().enumerate().map(move |(o, p)| EdgeTensor {
                    group: g,
                    offset: o,
                    weight: p.weight.data.clone(),
                    bias: p.bias.clone(),
                })
            })
            .collect();
        ParameterSet {
            hidden: self.hidden,
            edges,
            positions: Some(self.position_weights.clone()),
        }
    }
}

fn check_hidden(hidden: usize) -> Result<()> {
    if hidden == 0 {
        return Err(BralmError::InvalidHiddenSize(hidden));
    }
    Ok(())
}

/// Shape and finiteness of one edge's parameters.
fn check_params(params: &EdgeParams, hidden: usize, edge: EdgeId) -> Result<()> {
    if params.hidden() != hidden || params.weight.data.len() != hidden * hidden {
        return Err(BralmError::DimensionMismatch {
            what: "weight matrix",
            expected: hidden * hidden,
            got: params.weight.data.len(),
        });
    }
    if params.bias.len() != hidden {
        return Err(BralmError::DimensionMismatch {
            what: "bias",
            expected: hidden,
            got: params.bias.len(),
        });
    }
    if !params.weight.data.iter().chain(&params.bias).all(|v| v.is_finite()) {
        return Err(BralmError::NonFiniteParameters { what: format!("edge {edge}") });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Serializable types for save/load
// ---------------------------------------------------------------------------

/// A keyed, possibly partial collection of trained parameters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    pub hidden: usize,
    #[serde(default)]
    pub edges: Vec<EdgeTensor>,
    #[serde(default)]
    pub positions: Option<Vec<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeTensor {
    pub group: usize,
    pub offset: usize,
    /// Row-major `hidden × hidden`.
    pub weight: Vec<f64>,
    pub bias: Vec<f64>,
}

impl ParameterSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Split into `n` parts by group, e.g. to write multi-file checkpoints.
    /// Position weights go with the last part.
    pub fn split(self, n: usize) -> Vec<ParameterSet> {
        let n = n.max(1);
        let mut parts: Vec<ParameterSet> = (0..n)
            .map(|_| ParameterSet { hidden: self.hidden, ..ParameterSet::default() })
            .collect();
        for tensor in self.edges {
            parts[tensor.group % n].edges.push(tensor);
        }
        parts[n - 1].positions = self.positions;
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn graph() -> VocabGraph {
        let dict: HashMap<String, usize> =
            [("x", 0), ("y", 1)].iter().map(|&(k, v)| (k.to_string(), v)).collect();
        VocabGraph::from_node_dict(&dict).unwrap()
    }

    #[test]
    fn test_random_values_stay_in_range() {
        let g = graph();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let store = EdgeParameterStore::random(&g, 4, &ExecutionContext::cpu(), &mut rng).unwrap();
        assert!(store.covers(&g));
        assert_eq!(store.num_edges(), 4);
        for e in g.edges() {
            let p = store.lookup(e.group, e.offset).unwrap();
            assert!(p.weight.data.iter().chain(&p.bias).all(|v| (-0.5..0.5).contains(v)));
        }
        assert_eq!(store.position_weights().len(), MAX_POSITIONS);
    }

    #[test]
    fn test_lookup_past_group_is_a_mismatch() {
        let g = graph();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let store = EdgeParameterStore::random(&g, 2, &ExecutionContext::cpu(), &mut rng).unwrap();
        assert!(matches!(
            store.lookup(1, 2),
            Err(BralmError::ParameterMismatch { group: 1, offset: 2 })
        ));
        assert!(store.lookup(5, 0).is_err());
    }

    #[test]
    fn test_short_position_weights_rejected() {
        let g = graph();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let store = EdgeParameterStore::random(&g, 2, &ExecutionContext::cpu(), &mut rng).unwrap();
        assert!(store.with_position_weights(vec![1.0; 10]).is_err());
    }

    #[test]
    fn test_zero_hidden_rejected() {
        let g = graph();
        let ctx = ExecutionContext::cpu();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            EdgeParameterStore::random(&g, 0, &ctx, &mut rng),
            Err(BralmError::InvalidHiddenSize(0))
        ));
        assert!(matches!(
            EdgeParameterStore::from_fn(&g, 0, &ctx, |_| EdgeParams { weight: Matrix::zeros(0), bias: vec![] }),
            Err(BralmError::InvalidHiddenSize(0))
        ));
        let empty = ParameterSet { hidden: 0, ..ParameterSet::default() };
        assert!(matches!(
            EdgeParameterStore::from_parts(&g, 0, vec![empty], &ctx),
            Err(BralmError::InvalidHiddenSize(0))
        ));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let g = graph();
        let ctx = ExecutionContext::cpu();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let store = EdgeParameterStore::random(&g, 2, &ctx, &mut rng).unwrap();

        let mut weights = vec![1.0; MAX_POSITIONS];
        weights[3] = f64::INFINITY;
        assert!(matches!(
            store.clone().with_position_weights(weights),
            Err(BralmError::NonFiniteParameters { .. })
        ));

        let mut set = store.to_parameter_set();
        set.edges[2].weight[1] = f64::NAN;
        assert!(matches!(
            EdgeParameterStore::from_parts(&g, 2, vec![set], &ctx),
            Err(BralmError::NonFiniteParameters { .. })
        ));

        let bad = EdgeParameterStore::from_fn(&g, 2, &ctx, |_| EdgeParams {
            weight: Matrix::identity(2),
            bias: vec![0.0, f64::NEG_INFINITY],
        });
        assert!(matches!(bad, Err(BralmError::NonFiniteParameters { .. })));
    }
}
