//! Path-finding over an adjacency callback.
//!
//! Both algorithms take a closure that yields outgoing neighbours, so they
//! run the same way over the sharded engine and over a plain map in tests.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Which end of the cost spectrum `weighted_path` optimises for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    #[default]
    Lowest,
    /// Greedy: the first time `end` is popped from the max-heap wins. Only
    /// meaningful on DAGs with positive weights; not a true longest path.
    Highest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPath {
    pub path: Vec<String>,
    pub cost: f64,
}

/// Unweighted shortest path by level-order BFS.
///
/// Returns `[start, .., end]` using at most `max_depth` hops, or an empty
/// vec if `end` is not reachable within that bound. Among equally short
/// paths the one found first in neighbour order wins.
pub fn shortest_path<F>(start: &str, end: &str, max_depth: usize, mut neighbors: F) -> Vec<String>
where
    F: FnMut(&str) -> Vec<String>,
{
    if start == end {
        return vec![start.to_string()];
    }

    let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut queue = VecDeque::from([start.to_string()]);
    let mut depth = 0;

    while !queue.is_empty() && depth < max_depth {
        let level_size = queue.len();

        for _ in 0..level_size {
            let Some(current) = queue.pop_front() else {
                break;
            };

            for next in neighbors(&current) {
                if !visited.insert(next.clone()) {
                    continue;
                }
                parent.insert(next.clone(), current.clone());
                if next == end {
                    return reconstruct(&parent, start, end);
                }
                queue.push_back(next);
            }
        }

        depth += 1;
    }

    Vec::new()
}

/// Dijkstra-style search over weighted edges.
///
/// `edges` yields `(target, weight)` pairs. Terminates the first time `end`
/// is popped. Returns `None` if `end` is unreachable.
pub fn weighted_path<F>(start: &str, end: &str, mode: PathMode, mut edges: F) -> Option<WeightedPath>
where
    F: FnMut(&str) -> Vec<(String, f64)>,
{
    if start == end {
        return Some(WeightedPath {
            path: vec![start.to_string()],
            cost: 0.0,
        });
    }

    let mut best: HashMap<String, f64> = HashMap::from([(start.to_string(), 0.0)]);
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut settled: HashSet<String> = HashSet::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    heap.push(Candidate::new(start.to_string(), 0.0, mode, seq));

    while let Some(Candidate { id, cost, .. }) = heap.pop() {
        if !settled.insert(id.clone()) {
            continue;
        }
        if id == end {
            return Some(WeightedPath {
                path: reconstruct(&parent, start, end),
                cost,
            });
        }

        for (next, weight) in edges(&id) {
            if settled.contains(&next) {
                continue;
            }
            let candidate = cost + weight;
            let improves = match best.get(&next) {
                None => true,
                Some(&known) => match mode {
                    PathMode::Lowest => candidate < known,
                    PathMode::Highest => candidate > known,
                },
            };
            if improves {
                best.insert(next.clone(), candidate);
                parent.insert(next.clone(), id.clone());
                seq += 1;
                heap.push(Candidate::new(next, candidate, mode, seq));
            }
        }
    }

    None
}

fn reconstruct(parent: &HashMap<String, String>, start: &str, end: &str) -> Vec<String> {
    let mut path = vec![end.to_string()];
    let mut current = end;
    while current != start {
        match parent.get(current) {
            Some(prev) => {
                path.push(prev.clone());
                current = prev;
            }
            None => return Vec::new(),
        }
    }
    path.reverse();
    path
}

/// Heap entry. `key` is the cost oriented so that the preferred candidate is
/// the maximum; ties go to the earlier push.
struct Candidate {
    id: String,
    cost: f64,
    key: f64,
    seq: u64,
}

impl Candidate {
    fn new(id: String, cost: f64, mode: PathMode, seq: u64) -> Self {
        let key = match mode {
            PathMode::Lowest => -cost,
            PathMode::Highest => cost,
        };
        Self { id, cost, key, seq }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (s, t) in edges {
            map.entry(s.to_string()).or_default().push(t.to_string());
        }
        map
    }

    fn weighted(edges: &[(&str, &str, f64)]) -> HashMap<String, Vec<(String, f64)>> {
        let mut map: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        for (s, t, w) in edges {
            map.entry(s.to_string()).or_default().push((t.to_string(), *w));
        }
        map
    }

    #[test]
    fn test_bfs_chain() {
        // A -> B -> C -> D
        let g = graph(&[("A", "B"), ("B", "C"), ("C", "D")]);
        let next = |id: &str| g.get(id).cloned().unwrap_or_default();

        assert_eq!(shortest_path("A", "D", 10, next), vec!["A", "B", "C", "D"]);
        assert_eq!(shortest_path("A", "D", 3, next), vec!["A", "B", "C", "D"]);
        assert!(shortest_path("A", "D", 2, next).is_empty());
    }

    #[test]
    fn test_bfs_prefers_fewer_hops() {
        // A -> B -> C -> D, plus shortcut A -> D
        let g = graph(&[("A", "B"), ("B", "C"), ("C", "D"), ("A", "D")]);
        let path = shortest_path("A", "D", 10, |id| g.get(id).cloned().unwrap_or_default());
        assert_eq!(path, vec!["A", "D"]);
    }

    #[test]
    fn test_bfs_tie_break_follows_edge_order() {
        let g = graph(&[("S", "X"), ("S", "Y"), ("X", "E"), ("Y", "E")]);
        let path = shortest_path("S", "E", 5, |id| g.get(id).cloned().unwrap_or_default());
        assert_eq!(path, vec!["S", "X", "E"]);
    }

    #[test]
    fn test_bfs_handles_cycles_and_unreachable() {
        let g = graph(&[("A", "B"), ("B", "A"), ("B", "C")]);
        let next = |id: &str| g.get(id).cloned().unwrap_or_default();
        assert_eq!(shortest_path("A", "C", 10, next), vec!["A", "B", "C"]);
        assert!(shortest_path("A", "Z", 10, next).is_empty());
        assert!(shortest_path("C", "A", 10, next).is_empty());
    }

    #[test]
    fn test_bfs_start_is_end() {
        assert_eq!(shortest_path("A", "A", 0, |_| Vec::new()), vec!["A"]);
    }

    #[test]
    fn test_weighted_lowest_takes_cheaper_detour() {
        let g = weighted(&[("A", "B", 5.0), ("A", "C", 1.0), ("C", "B", 1.0)]);
        let result = weighted_path("A", "B", PathMode::Lowest, |id| {
            g.get(id).cloned().unwrap_or_default()
        })
        .unwrap();
        assert_eq!(result.path, vec!["A", "C", "B"]);
        assert_eq!(result.cost, 2.0);
    }

    #[test]
    fn test_weighted_highest_is_first_pop() {
        let g = weighted(&[("A", "B", 5.0), ("A", "C", 1.0), ("C", "B", 1.0)]);
        let result = weighted_path("A", "B", PathMode::Highest, |id| {
            g.get(id).cloned().unwrap_or_default()
        })
        .unwrap();
        assert_eq!(result.path, vec!["A", "B"]);
        assert_eq!(result.cost, 5.0);
    }

    #[test]
    fn test_weighted_highest_on_dag() {
        // A -> B (1) -> D (10) beats A -> C (3) -> D (1)
        let g = weighted(&[("A", "B", 1.0), ("A", "C", 3.0), ("B", "D", 10.0), ("C", "D", 1.0)]);
        let result = weighted_path("A", "D", PathMode::Highest, |id| {
            g.get(id).cloned().unwrap_or_default()
        })
        .unwrap();
        // Greedy: C (3) is expanded first and settles D at 4 before B is looked at
        assert_eq!(result.path, vec!["A", "C", "D"]);
        assert_eq!(result.cost, 4.0);
    }

    #[test]
    fn test_weighted_terminates_on_cycles() {
        let g = weighted(&[("A", "B", 1.0), ("B", "A", 1.0), ("B", "C", 2.0)]);
        for mode in [PathMode::Lowest, PathMode::Highest] {
            let result = weighted_path("A", "C", mode, |id| g.get(id).cloned().unwrap_or_default())
                .unwrap();
            assert_eq!(result.path, vec!["A", "B", "C"]);
            assert_eq!(result.cost, 3.0);
        }
    }

    #[test]
    fn test_weighted_unreachable() {
        let g = weighted(&[("A", "B", 1.0)]);
        assert!(weighted_path("B", "A", PathMode::Lowest, |id| g.get(id).cloned().unwrap_or_default())
            .is_none());
    }
}
