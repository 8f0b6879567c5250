//! Vocabulary graph: character nodes, directed edges, dense edge ids.
//!
//! The model's token unit is an edge `source->target` between two characters.
//! Each edge is identified by `(group, offset)`: `group` is the source node's
//! index, `offset` the target's rank among the source's registered edges.
//! Storage is arena-style, one target list per group, so parameter lookups
//! are plain `[group][offset]` indexing.
//!
//! Two construction modes:
//!   - Dense:  every ordered node pair is an edge (self-pairs included)
//!   - Sparse: only observed `source->target` lines are edges, with
//!             `<unk>-><unk>` pre-registered at `(0, 0)`

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{BralmError, Result};
use crate::types::{EdgeId, NodeId};

/// Label of the unknown-node sentinel.
pub const UNK: &str = "<unk>";

/// Separator between source and target in an edge label.
pub const ARROW: &str = "->";

// ---------------------------------------------------------------------------
// NeighborLimit / GraphMode
// ---------------------------------------------------------------------------

/// How many neighbor edges to return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborLimit {
    All,
    Top(usize),
}

impl NeighborLimit {
    fn apply(self, edges: &mut Vec<EdgeId>) {
        if let Self::Top(k) = self {
            edges.truncate(k);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphMode {
    Dense,
    Sparse,
}

// ---------------------------------------------------------------------------
// VocabGraph
// ---------------------------------------------------------------------------

/// Bidirectional mapping between nodes, edges and `(group, offset)` ids.
#[derive(Clone, Debug)]
pub struct VocabGraph {
    mode: GraphMode,
    /// Node index -> label
    labels: Vec<String>,
    /// Label -> node index
    node_index: HashMap<String, NodeId>,
    /// Group (source node) -> offset -> target node
    targets: Vec<Vec<NodeId>>,
    /// (source, target) -> edge id
    edge_index: HashMap<(NodeId, NodeId), EdgeId>,
}

impl VocabGraph {
    /// Dense construction from a `label -> index` description.
    ///
    /// Indices must be exactly `0..n`. Every ordered pair becomes an edge and
    /// `offset` enumerates targets in index order.
    pub fn from_node_dict(node_dict: &HashMap<String, usize>) -> Result<Self> {
        let n = node_dict.len();
        if n == 0 {
            return Err(BralmError::InvalidVocabulary("empty node set".into()));
        }

        let mut slots: Vec<Option<String>> = vec![None; n];
        for (label, &index) in node_dict {
            if index >= n {
                return Err(BralmError::InvalidVocabulary(format!(
                    "index {index} of {label:?} is outside 0..{n}"
                )));
            }
            if let Some(other) = &slots[index] {
                return Err(BralmError::InvalidVocabulary(format!(
                    "{label:?} and {other:?} share index {index}"
                )));
            }
            slots[index] = Some(label.clone());
        }
        // n distinct indices all below n fill every slot
        let labels: Vec<String> = slots.into_iter().flatten().collect();

        let mut node_index = HashMap::with_capacity(n);
        for (i, label) in labels.iter().enumerate() {
            node_index.insert(label.clone(), i);
        }

        let mut targets = Vec::with_capacity(n);
        let mut edge_index = HashMap::with_capacity(n * n);
        for s in 0..n {
            targets.push((0..n).collect());
            for t in 0..n {
                edge_index.insert((s, t), EdgeId::new(s, t));
            }
        }

        debug!("dense vocabulary graph: {} nodes, {} edges", n, n * n);
        Ok(Self { mode: GraphMode::Dense, labels, node_index, targets, edge_index })
    }

    /// Sparse construction from observed `source->target` lines.
    ///
    /// Sources take groups in order of first appearance as a source
    /// (`<unk>` is group 0), offsets grow per source in order of first
    /// appearance. Nodes seen only as targets are indexed after all sources.
    /// Blank lines are skipped and repeated edges keep their first id.
    pub fn from_edges<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for line in lines {
            let line = line.as_ref().trim_end_matches(&['\r', '\n'][..]);
            if line.trim().is_empty() {
                continue;
            }
            let (s, t) = split_label(line).ok_or_else(|| BralmError::MalformedEdge(line.to_string()))?;
            pairs.push((s.to_string(), t.to_string()));
        }

        let mut labels = vec![UNK.to_string()];
        let mut node_index = HashMap::new();
        node_index.insert(UNK.to_string(), 0);

        // Pass 1: sources claim their group index.
        for (s, _) in &pairs {
            if !node_index.contains_key(s) {
                node_index.insert(s.clone(), labels.len());
                labels.push(s.clone());
            }
        }
        let num_sources = labels.len();
        // Pass 2: target-only nodes.
        for (_, t) in &pairs {
            if !node_index.contains_key(t) {
                node_index.insert(t.clone(), labels.len());
                labels.push(t.clone());
            }
        }

        let mut targets: Vec<Vec<NodeId>> = vec![Vec::new(); labels.len()];
        let mut edge_index = HashMap::new();
        targets[0].push(0);
        edge_index.insert((0, 0), EdgeId::UNKNOWN);

        for (s, t) in &pairs {
            let (si, ti) = (node_index[s], node_index[t]);
            if edge_index.contains_key(&(si, ti)) {
                debug!("duplicate edge {s}{ARROW}{t} ignored");
                continue;
            }
            let id = EdgeId::new(si, targets[si].len());
            targets[si].push(ti);
            edge_index.insert((si, ti), id);
        }

        debug!(
            "sparse vocabulary graph: {} nodes ({} sources), {} edges",
            labels.len(),
            num_sources,
            edge_index.len()
        );
        Ok(Self { mode: GraphMode::Sparse, labels, node_index, targets, edge_index })
    }

    /// Sparse construction from a file of `source->target` lines.
    pub fn from_edge_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_edges(text.lines())
    }

    // =======================================================================
    // Sizes and node lookup
    // =======================================================================

    pub fn mode(&self) -> GraphMode {
        self.mode
    }

    pub fn num_nodes(&self) -> usize {
        self.labels.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.len()
    }

    /// Number of groups, i.e. parameter slots on the group axis.
    pub fn num_groups(&self) -> usize {
        self.targets.len()
    }

    /// Number of registered edges leaving `group`.
    pub fn group_len(&self, group: usize) -> usize {
        self.targets.get(group).map_or(0, Vec::len)
    }

    pub fn node_id(&self, label: &str) -> Option<NodeId> {
        self.node_index.get(label).copied()
    }

    pub fn node_label(&self, node: NodeId) -> Option<&str> {
        self.labels.get(node).map(String::as_str)
    }

    pub fn contains(&self, edge: EdgeId) -> bool {
        self.targets
            .get(edge.group)
            .is_some_and(|ts| edge.offset < ts.len())
    }

    /// All registered edge ids, group by group.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.targets
            .iter()
            .enumerate()
            .flat_map(|(g, ts)| (0..ts.len()).map(move |o| EdgeId::new(g, o)))
    }

    // =======================================================================
    // Forward and inverse mapping
    // =======================================================================

    /// Resolve a `source->target` label. Anything unregistered or malformed
    /// maps to the unknown edge `(0, 0)`.
    pub fn fetch(&self, label: &str) -> EdgeId {
        match split_label(label) {
            Some((s, t)) => self.fetch_pair(s, t),
            None => {
                debug!("malformed edge label {label:?}, using unknown edge");
                EdgeId::UNKNOWN
            }
        }
    }

    /// Resolve an edge from its endpoint labels.
    pub fn fetch_pair(&self, source: &str, target: &str) -> EdgeId {
        let edge = self
            .node_id(source)
            .zip(self.node_id(target))
            .and_then(|pair| self.edge_index.get(&pair).copied());
        match edge {
            Some(id) => id,
            None => {
                debug!("unknown edge {source}{ARROW}{target}, using unknown edge");
                EdgeId::UNKNOWN
            }
        }
    }

    /// `(source, target)` node indices of a registered edge.
    pub fn endpoints(&self, edge: EdgeId) -> Result<(NodeId, NodeId)> {
        self.targets
            .get(edge.group)
            .and_then(|ts| ts.get(edge.offset))
            .map(|&t| (edge.group, t))
            .ok_or(BralmError::UnknownEdgeId { group: edge.group, offset: edge.offset })
    }

    pub fn target(&self, edge: EdgeId) -> Result<NodeId> {
        self.endpoints(edge).map(|(_, t)| t)
    }

    /// Exact inverse of the forward mapping.
    pub fn decode(&self, edge: EdgeId) -> Result<String> {
        let (s, t) = self.endpoints(edge)?;
        Ok(format!("{}{ARROW}{}", self.labels[s], self.labels[t]))
    }

    // =======================================================================
    // Neighbor enumeration
    // =======================================================================

    /// All registered edges leaving `node`, self-loop included.
    pub fn edges_of_node(&self, node: NodeId) -> Result<Vec<EdgeId>> {
        let ts = self.targets.get(node).ok_or(BralmError::UnknownNode(node))?;
        Ok((0..ts.len()).map(|o| EdgeId::new(node, o)).collect())
    }

    /// Edges leaving `node` except the self-loop, in offset order.
    pub fn neighbors_of_node(&self, node: NodeId, limit: NeighborLimit) -> Result<Vec<EdgeId>> {
        let mut edges = self.outgoing_except(node, node)?;
        limit.apply(&mut edges);
        Ok(edges)
    }

    /// Like [`neighbors_of_node`](Self::neighbors_of_node), shuffled before
    /// truncation.
    pub fn sample_neighbors_of_node<R: Rng + ?Sized>(
        &self,
        node: NodeId,
        limit: NeighborLimit,
        rng: &mut R,
    ) -> Result<Vec<EdgeId>> {
        let mut edges = self.outgoing_except(node, node)?;
        edges.shuffle(rng);
        limit.apply(&mut edges);
        Ok(edges)
    }

    /// Edges leaving the label's source except the label's own target.
    /// An unregistered source falls back to the unknown group.
    pub fn neighbors_of_edge(&self, label: &str, limit: NeighborLimit) -> Vec<EdgeId> {
        let mut edges = self.edge_alternatives(label);
        limit.apply(&mut edges);
        edges
    }

    pub fn sample_neighbors_of_edge<R: Rng + ?Sized>(
        &self,
        label: &str,
        limit: NeighborLimit,
        rng: &mut R,
    ) -> Vec<EdgeId> {
        let mut edges = self.edge_alternatives(label);
        edges.shuffle(rng);
        limit.apply(&mut edges);
        edges
    }

    /// Draw one shuffled set of alternative targets from `key`'s source and
    /// apply it to the source of every edge in `edges`. Pairs that are not
    /// registered resolve to the unknown edge.
    pub fn neighbors_of_edge_broadcast<R: Rng + ?Sized>(
        &self,
        key: &str,
        edges: &[&str],
        limit: NeighborLimit,
        rng: &mut R,
    ) -> Vec<Vec<EdgeId>> {
        let mut alternatives: Vec<NodeId> = self
            .edge_alternatives(key)
            .into_iter()
            .filter_map(|e| self.target(e).ok())
            .collect();
        alternatives.shuffle(rng);
        if let NeighborLimit::Top(k) = limit {
            alternatives.truncate(k);
        }

        edges
            .iter()
            .map(|edge| {
                let source = split_label(edge).map_or(UNK, |(s, _)| s);
                alternatives
                    .iter()
                    .map(|&t| self.fetch_pair(source, &self.labels[t]))
                    .collect()
            })
            .collect()
    }

    fn outgoing_except(&self, node: NodeId, excluded: NodeId) -> Result<Vec<EdgeId>> {
        let ts = self.targets.get(node).ok_or(BralmError::UnknownNode(node))?;
        Ok(ts
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t != excluded)
            .map(|(o, _)| EdgeId::new(node, o))
            .collect())
    }

    fn edge_alternatives(&self, label: &str) -> Vec<EdgeId> {
        let (s, t) = split_label(label).unwrap_or((UNK, UNK));
        let source = self.node_id(s).unwrap_or(EdgeId::UNKNOWN.group);
        let ts = &self.targets[source];
        ts.iter()
            .enumerate()
            .filter(|&(_, &ti)| self.labels[ti] != t)
            .map(|(o, _)| EdgeId::new(source, o))
            .collect()
    }

    // =======================================================================
    // Text <-> edge sequences
    // =======================================================================

    /// Adjacent-pair labels of a token sequence.
    pub fn to_path<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
        tokens
            .windows(2)
            .map(|w| format!("{}{ARROW}{}", w[0].as_ref(), w[1].as_ref()))
            .collect()
    }

    /// One edge per adjacent character pair of `text`.
    pub fn encode_text(&self, text: &str) -> Result<Vec<EdgeId>> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() < 2 {
            return Err(BralmError::PromptTooShort(chars.len()));
        }
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        Ok(chars
            .windows(2)
            .map(|w| self.fetch_pair(w[0].encode_utf8(&mut a), w[1].encode_utf8(&mut b)))
            .collect())
    }

    /// Source of the first edge followed by the target of every edge.
    pub fn decode_text(&self, edges: &[EdgeId]) -> Result<String> {
        let mut text = String::new();
        if let Some(&first) = edges.first() {
            let (s, _) = self.endpoints(first)?;
            text.push_str(&self.labels[s]);
        }
        for &edge in edges {
            text.push_str(&self.labels[self.target(edge)?]);
        }
        Ok(text)
    }
}

/// Split a label at its first `->`. Both sides must be non-empty.
fn split_label(label: &str) -> Option<(&str, &str)> {
    label
        .split_once(ARROW)
        .filter(|(s, t)| !s.is_empty() && !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> VocabGraph {
        let dict: HashMap<String, usize> =
            [("A", 0), ("B", 1), ("C", 2)].iter().map(|&(k, v)| (k.to_string(), v)).collect();
        VocabGraph::from_node_dict(&dict).unwrap()
    }

    #[test]
    fn test_dense_offsets_follow_index_order() {
        let g = abc();
        assert_eq!(g.fetch("B->C"), EdgeId::new(1, 2));
        assert_eq!(g.fetch("A->A"), EdgeId::new(0, 0));
        assert_eq!(g.num_edges(), 9);
        assert_eq!(g.group_len(2), 3);
    }

    #[test]
    fn test_dense_rejects_gapped_indices() {
        let dict: HashMap<String, usize> =
            [("A", 0), ("B", 2)].iter().map(|&(k, v)| (k.to_string(), v)).collect();
        assert!(matches!(
            VocabGraph::from_node_dict(&dict),
            Err(BralmError::InvalidVocabulary(_))
        ));
    }

    #[test]
    fn test_split_label_rejects_empty_sides() {
        assert_eq!(split_label("a->b"), Some(("a", "b")));
        assert_eq!(split_label("a->"), None);
        assert_eq!(split_label("ab"), None);
    }

    #[test]
    fn test_encode_text_needs_two_chars() {
        let g = abc();
        assert!(matches!(g.encode_text("A"), Err(BralmError::PromptTooShort(1))));
        assert_eq!(g.encode_text("ABC").unwrap(), vec![EdgeId::new(0, 1), EdgeId::new(1, 2)]);
    }
}
