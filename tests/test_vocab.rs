//! Tests for the vocabulary graph: construction modes, id mapping,
//! neighbor enumeration and text encoding.

use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use bralm::errors::BralmError;
use bralm::vocab::{GraphMode, NeighborLimit, VocabGraph, UNK};
use bralm::EdgeId;

fn dense(labels: &[&str]) -> VocabGraph {
    let dict: HashMap<String, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.to_string(), i))
        .collect();
    VocabGraph::from_node_dict(&dict).expect("valid node dict")
}

fn sparse() -> VocabGraph {
    VocabGraph::from_edges(["b->c", "a->b", "", "b->a", "c->d", "b->c"]).expect("valid edges")
}

// ---------------------------------------------------------------------------
// Dense construction
// ---------------------------------------------------------------------------

#[test]
fn test_dense_registers_every_ordered_pair() {
    let g = dense(&["A", "B", "C", "D"]);
    assert_eq!(g.mode(), GraphMode::Dense);
    assert_eq!(g.num_nodes(), 4);
    assert_eq!(g.num_edges(), 16);
    for s in 0..4 {
        assert_eq!(g.group_len(s), 4);
    }
    assert_eq!(g.fetch("C->C"), EdgeId::new(2, 2));
    assert_eq!(g.fetch("D->A"), EdgeId::new(3, 0));
}

#[test]
fn test_dense_rejects_duplicate_and_empty_descriptions() {
    let empty: HashMap<String, usize> = HashMap::new();
    assert!(VocabGraph::from_node_dict(&empty).is_err());

    let dup: HashMap<String, usize> = [("x".to_string(), 1), ("y".to_string(), 1)].into_iter().collect();
    assert!(matches!(
        VocabGraph::from_node_dict(&dup),
        Err(BralmError::InvalidVocabulary(_))
    ));
}

// ---------------------------------------------------------------------------
// Sparse construction
// ---------------------------------------------------------------------------

#[test]
fn test_sparse_assigns_groups_by_first_source_appearance() {
    let g = sparse();
    assert_eq!(g.mode(), GraphMode::Sparse);
    assert_eq!(g.fetch("<unk>-><unk>"), EdgeId::UNKNOWN);
    assert_eq!(g.fetch("b->c"), EdgeId::new(1, 0));
    assert_eq!(g.fetch("b->a"), EdgeId::new(1, 1));
    assert_eq!(g.fetch("a->b"), EdgeId::new(2, 0));
    assert_eq!(g.fetch("c->d"), EdgeId::new(3, 0));
    // duplicate b->c ignored, blank line skipped
    assert_eq!(g.num_edges(), 5);
    assert_eq!(g.group_len(1), 2);
}

#[test]
fn test_sparse_target_only_nodes_come_after_sources() {
    let g = sparse();
    assert_eq!(g.node_id(UNK), Some(0));
    assert_eq!(g.node_id("b"), Some(1));
    assert_eq!(g.node_id("d"), Some(4));
    assert_eq!(g.group_len(4), 0);
}

#[test]
fn test_sparse_rejects_malformed_lines() {
    let err = VocabGraph::from_edges(["a->b", "ab"]).unwrap_err();
    assert!(matches!(err, BralmError::MalformedEdge(ref l) if l == "ab"));
}

#[test]
fn test_sparse_keeps_space_nodes() {
    let g = VocabGraph::from_edges(["a-> ", " ->a"]).unwrap();
    assert_eq!(g.fetch("a-> "), EdgeId::new(1, 0));
    assert_eq!(g.fetch(" ->a"), EdgeId::new(2, 0));
}

#[test]
fn test_from_edge_file_reads_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edges.txt");
    std::fs::write(&path, "x->y\r\ny->x\n").unwrap();
    let g = VocabGraph::from_edge_file(&path).unwrap();
    assert_eq!(g.fetch("x->y"), EdgeId::new(1, 0));
    assert_eq!(g.fetch("y->x"), EdgeId::new(2, 0));
}

// ---------------------------------------------------------------------------
// Id mapping
// ---------------------------------------------------------------------------

#[test]
fn test_round_trip_every_edge() {
    for g in [dense(&["A", "B", "C"]), sparse()] {
        for edge in g.edges() {
            let label = g.decode(edge).unwrap();
            assert_eq!(g.fetch(&label), edge, "label {label}");
            assert_eq!(g.decode(g.fetch(&label)).unwrap(), label);
        }
    }
}

#[test]
fn test_unknown_lookups_fall_back() {
    let g = dense(&["A", "B"]);
    assert_eq!(g.fetch("A->Z"), EdgeId::UNKNOWN);
    assert_eq!(g.fetch("Z->A"), EdgeId::UNKNOWN);
    assert_eq!(g.fetch("garbage"), EdgeId::UNKNOWN);
    assert_eq!(g.fetch("->"), EdgeId::UNKNOWN);

    let s = sparse();
    // both endpoints known, pair never observed
    assert_eq!(s.fetch("a->c"), EdgeId::UNKNOWN);
}

#[test]
fn test_decode_rejects_unregistered_ids() {
    let g = sparse();
    assert!(matches!(
        g.decode(EdgeId::new(3, 1)),
        Err(BralmError::UnknownEdgeId { group: 3, offset: 1 })
    ));
    assert!(g.decode(EdgeId::new(40, 0)).is_err());
}

// ---------------------------------------------------------------------------
// Neighbors
// ---------------------------------------------------------------------------

#[test]
fn test_neighbors_of_node_exclude_self_loop() {
    let g = dense(&["A", "B", "C", "D"]);
    for node in 0..4 {
        let n = g.neighbors_of_node(node, NeighborLimit::All).unwrap();
        assert_eq!(n.len(), 3);
        for e in &n {
            assert_eq!(e.group, node);
            assert_ne!(g.target(*e).unwrap(), node);
        }
    }
    assert_eq!(
        g.neighbors_of_node(1, NeighborLimit::Top(2)).unwrap(),
        vec![EdgeId::new(1, 0), EdgeId::new(1, 2)]
    );
    assert!(matches!(
        g.neighbors_of_node(9, NeighborLimit::All),
        Err(BralmError::UnknownNode(9))
    ));
}

#[test]
fn test_shuffled_neighbors_are_a_truncated_permutation() {
    let g = dense(&["A", "B", "C", "D", "E"]);
    let all: HashSet<EdgeId> = g.neighbors_of_node(0, NeighborLimit::All).unwrap().into_iter().collect();
    let mut firsts = HashSet::new();
    for seed in 0..32 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let picked = g.sample_neighbors_of_node(0, NeighborLimit::Top(2), &mut rng).unwrap();
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|e| all.contains(e)));
        firsts.insert(picked[0]);
    }
    assert!(firsts.len() > 1, "shuffle never changed the first neighbor");
}

#[test]
fn test_neighbors_of_edge_exclude_own_target() {
    let g = dense(&["A", "B", "C"]);
    let n = g.neighbors_of_edge("A->B", NeighborLimit::All);
    assert_eq!(n, vec![EdgeId::new(0, 0), EdgeId::new(0, 2)]);

    let s = sparse();
    assert_eq!(s.neighbors_of_edge("b->c", NeighborLimit::All), vec![EdgeId::new(1, 1)]);
    // unknown source falls back to the <unk> group
    assert_eq!(s.neighbors_of_edge("z->q", NeighborLimit::All), vec![EdgeId::UNKNOWN]);

    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let one = g.sample_neighbors_of_edge("C->A", NeighborLimit::Top(1), &mut rng);
    assert_eq!(one.len(), 1);
    assert_ne!(one[0], EdgeId::new(2, 0));
}

#[test]
fn test_broadcast_shares_one_shuffle() {
    let g = dense(&["A", "B", "C", "D"]);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let rows = g.neighbors_of_edge_broadcast("A->B", &["B->A", "C->A"], NeighborLimit::All, &mut rng);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 3);
    for (x, y) in rows[0].iter().zip(&rows[1]) {
        assert_eq!(x.group, 1);
        assert_eq!(y.group, 2);
        assert_eq!(x.offset, y.offset);
        assert_ne!(x.offset, 1);
    }

    let limited = g.neighbors_of_edge_broadcast("A->B", &["D->A"], NeighborLimit::Top(2), &mut rng);
    assert_eq!(limited[0].len(), 2);
}

#[test]
fn test_edges_of_node_include_self_loop() {
    let g = dense(&["A", "B"]);
    assert_eq!(g.edges_of_node(1).unwrap(), vec![EdgeId::new(1, 0), EdgeId::new(1, 1)]);
}

// ---------------------------------------------------------------------------
// Text encoding
// ---------------------------------------------------------------------------

#[test]
fn test_to_path_pairs_adjacent_tokens() {
    assert_eq!(VocabGraph::to_path(&["a", "b", "c"]), vec!["a->b", "b->c"]);
    assert!(VocabGraph::to_path(&["a"]).is_empty());
}

#[test]
fn test_text_round_trip() {
    let g = dense(&["h", "e", "l", "o", "-", ">"]);
    for text in ["hello", "he", "h->o", "-->"] {
        let edges = g.encode_text(text).unwrap();
        assert_eq!(edges.len(), text.chars().count() - 1);
        assert_eq!(g.decode_text(&edges).unwrap(), text);
    }
}

#[test]
fn test_text_with_unknown_chars_degrades_to_unknown_edge() {
    let g = dense(&["a", "b"]);
    let edges = g.encode_text("abz").unwrap();
    assert_eq!(edges, vec![EdgeId::new(0, 1), EdgeId::UNKNOWN]);
    assert!(matches!(g.encode_text(""), Err(BralmError::PromptTooShort(0))));
}
