//! PageRank over a materialised topology.

use std::collections::HashMap;

pub const DEFAULT_DAMPING: f64 = 0.85;
pub const DEFAULT_ITERATIONS: usize = 20;

/// Highest score after normalisation
pub const SCORE_SCALE: f64 = 10.0;

/// In-neighbour lists and out-degrees for every node, built once before
/// iterating. Edges whose endpoints are not known nodes are ignored.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: Vec<String>,
    slot: HashMap<String, usize>,
    incoming: Vec<Vec<usize>>,
    out_degree: Vec<usize>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.slot.contains_key(&id) {
            return;
        }
        self.slot.insert(id.clone(), self.nodes.len());
        self.nodes.push(id);
        self.incoming.push(Vec::new());
        self.out_degree.push(0);
    }

    /// Must be called after both endpoints were added.
    pub fn add_edge(&mut self, source: &str, target: &str) -> bool {
        let (Some(&s), Some(&t)) = (self.slot.get(source), self.slot.get(target)) else {
            return false;
        };
        self.incoming[t].push(s);
        self.out_degree[s] += 1;
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out_degree.iter().sum()
    }
}

/// Iterate `r(v) = (1 - d) + d * sum(r(u) / out(u))` over in-neighbours `u`,
/// starting from `1/N`. Dangling nodes contribute nothing. The result is
/// scaled so the top score is exactly `SCORE_SCALE`.
pub fn page_rank(topology: &Topology, iterations: usize, damping: f64) -> HashMap<String, f64> {
    let n = topology.node_count();
    if n == 0 {
        return HashMap::new();
    }

    let mut ranks = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _ in 0..iterations {
        for (v, slot) in next.iter_mut().enumerate() {
            let inflow: f64 = topology.incoming[v]
                .iter()
                .map(|&u| ranks[u] / topology.out_degree[u] as f64)
                .sum();
            *slot = (1.0 - damping) + damping * inflow;
        }
        std::mem::swap(&mut ranks, &mut next);
    }

    let max = ranks.iter().copied().fold(0.0_f64, f64::max);
    let scale = if max > 0.0 { SCORE_SCALE / max } else { 1.0 };

    topology
        .nodes
        .iter()
        .zip(ranks)
        .map(|(id, r)| (id.clone(), r * scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(nodes: &[&str], edges: &[(&str, &str)]) -> Topology {
        let mut t = Topology::new();
        for n in nodes {
            t.add_node(*n);
        }
        for (s, d) in edges {
            t.add_edge(s, d);
        }
        t
    }

    #[test]
    fn test_empty_graph() {
        assert!(page_rank(&Topology::new(), 20, DEFAULT_DAMPING).is_empty());
    }

    #[test]
    fn test_hub_ranks_highest() {
        let t = topology(
            &["hub", "a", "b", "c"],
            &[("a", "hub"), ("b", "hub"), ("c", "hub"), ("hub", "a")],
        );
        let scores = page_rank(&t, DEFAULT_ITERATIONS, DEFAULT_DAMPING);

        assert_eq!(scores["hub"], SCORE_SCALE);
        assert!(scores["a"] > scores["b"]);
        assert!((scores["b"] - scores["c"]).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric_cycle_is_uniform() {
        let t = topology(&["x", "y", "z"], &[("x", "y"), ("y", "z"), ("z", "x")]);
        let scores = page_rank(&t, 30, DEFAULT_DAMPING);
        for id in ["x", "y", "z"] {
            assert!((scores[id] - SCORE_SCALE).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_iterations_keeps_uniform_start() {
        let t = topology(&["a", "b"], &[("a", "b")]);
        let scores = page_rank(&t, 0, DEFAULT_DAMPING);
        assert_eq!(scores["a"], SCORE_SCALE);
        assert_eq!(scores["b"], SCORE_SCALE);
    }

    #[test]
    fn test_single_iteration_by_hand() {
        // a -> b, a is dangling-free, b is dangling
        let t = topology(&["a", "b"], &[("a", "b")]);
        let scores = page_rank(&t, 1, 0.5);
        // r(a) = 0.5, r(b) = 0.5 + 0.5 * 0.5 = 0.75; scaled by 10 / 0.75
        assert!((scores["b"] - 10.0).abs() < 1e-9);
        assert!((scores["a"] - 0.5 * 10.0 / 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_edges_to_unknown_nodes_are_ignored() {
        let mut t = topology(&["a"], &[]);
        assert!(!t.add_edge("a", "ghost"));
        assert_eq!(t.edge_count(), 0);
    }
}
