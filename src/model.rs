//! EdgeModel: the top-level inference API.
//!
//! Bundles the vocabulary graph, the parameter store, the position table and
//! the execution context:
//!
//!   text → encode_prompt → prefix edges → Decoder → edges → decode_text
//!
//! The model is immutable once built; every `generate` call owns its own
//! energy cache, so one model can serve many calls.

use std::path::Path;

use log::debug;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{load_node_dict, ModelConfig};
use crate::decoder::{DecodeOutput, Decoder};
use crate::device::ExecutionContext;
use crate::energy::EnergyPropagator;
use crate::errors::Result;
use crate::params::EdgeParameterStore;
use crate::position::{PositionTable, MAX_POSITIONS};
use crate::sampling::{DecodeConfig, GenerationResult};
use crate::types::EdgeId;
use crate::vocab::VocabGraph;

// ---------------------------------------------------------------------------
// EdgeModel
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EdgeModel {
    graph: VocabGraph,
    store: EdgeParameterStore,
    table: PositionTable,
    ctx: ExecutionContext,
}

impl EdgeModel {
    /// Assemble a model. The store must have been built for `graph` on the
    /// same execution target as `ctx`.
    pub fn new(graph: VocabGraph, store: EdgeParameterStore, ctx: ExecutionContext) -> Result<Self> {
        ctx.ensure(store.device())?;
        store.check_against(&graph)?;
        let table = PositionTable::encode(MAX_POSITIONS, store.hidden());
        debug!(
            "model ready: {} nodes, {} edges, hidden={}, device={}",
            graph.num_nodes(),
            graph.num_edges(),
            store.hidden(),
            ctx.device()
        );
        Ok(Self { graph, store, table, ctx })
    }

    /// Model with freshly initialised parameters.
    pub fn random(graph: VocabGraph, config: &ModelConfig) -> Result<Self> {
        let ctx = ExecutionContext::new(config.device);
        let mut rng = ChaCha8Rng::seed_from_u64(config.init_seed);
        let store = EdgeParameterStore::random(&graph, config.hidden_size, &ctx, &mut rng)?;
        Self::new(graph, store, ctx)
    }

    /// Dense vocabulary from a JSON node dictionary plus merged parameter
    /// files.
    pub fn load<P: AsRef<Path>>(vocab_path: impl AsRef<Path>, param_paths: &[P], config: &ModelConfig) -> Result<Self> {
        let graph = VocabGraph::from_node_dict(&load_node_dict(vocab_path)?)?;
        let ctx = ExecutionContext::new(config.device);
        let store = EdgeParameterStore::load(&graph, config.hidden_size, param_paths, &ctx)?;
        Self::new(graph, store, ctx)
    }

    pub fn graph(&self) -> &VocabGraph {
        &self.graph
    }

    pub fn store(&self) -> &EdgeParameterStore {
        &self.store
    }

    pub fn position_table(&self) -> &PositionTable {
        &self.table
    }

    pub fn context(&self) -> ExecutionContext {
        self.ctx
    }

    pub fn propagator(&self) -> Result<EnergyPropagator<'_>> {
        EnergyPropagator::new(self.ctx, &self.store, &self.table)
    }

    pub fn decoder(&self) -> Result<Decoder<'_>> {
        Ok(Decoder::new(&self.graph, self.propagator()?))
    }

    /// Prefix edges of a prompt. Needs at least two characters.
    pub fn encode_prompt(&self, prompt: &str) -> Result<Vec<EdgeId>> {
        self.graph.encode_text(prompt)
    }

    pub fn decode_edges(&self, prefix: &[EdgeId], config: &DecodeConfig, rng: &mut dyn RngCore) -> Result<DecodeOutput> {
        self.decoder()?.decode(prefix, config, rng)
    }

    /// Generate from a prompt. Randomness comes from `config.seed`, or from
    /// the OS when no seed is set.
    pub fn generate(&self, prompt: &str, config: &DecodeConfig) -> Result<GenerationResult> {
        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        self.generate_with_rng(prompt, config, &mut rng)
    }

    pub fn generate_with_rng(
        &self,
        prompt: &str,
        config: &DecodeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<GenerationResult> {
        config.validate()?;
        let prefix = self.encode_prompt(prompt)?;
        let output = self.decode_edges(&prefix, config, rng)?;

        let text = self.graph.decode_text(&output.edges)?;
        let mut continuation = String::new();
        for &edge in output.generated() {
            let target = self.graph.target(edge)?;
            continuation.push_str(self.graph.node_label(target).unwrap_or_default());
        }

        Ok(GenerationResult {
            prompt: prompt.to_string(),
            text,
            continuation,
            edges: output.edges,
            steps: output.steps,
        })
    }
}
