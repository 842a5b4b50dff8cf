//! Stage dependency graphs
//!
//! Pure, in-memory graph logic shared by template graphs (stage definitions)
//! and project graphs (stage instances). Nothing here touches the database:
//! the repository layer loads rows, calls into this module inside its
//! transaction, and persists only when the checks pass.
//!
//! - [`validate_edge`]: admission check for a single new edge
//! - [`find_cycle`]: whole-graph acyclicity check
//! - [`gating`]: eligibility of project stages from their statuses

pub mod gating;
mod validate;

pub use validate::{find_cycle, validate_edge};

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Adjacency view over a set of `prerequisite -> dependent` edges
#[derive(Debug, Clone)]
pub struct DependencyGraph<N> {
    forward: HashMap<N, Vec<N>>,
    backward: HashMap<N, Vec<N>>,
}

impl<N> DependencyGraph<N>
where
    N: Copy + Eq + Hash + Ord,
{
    /// Build the adjacency lists. Duplicate edges are collapsed.
    pub fn from_edges(edges: impl IntoIterator<Item = (N, N)>) -> Self {
        let mut forward: HashMap<N, Vec<N>> = HashMap::new();
        let mut backward: HashMap<N, Vec<N>> = HashMap::new();
        let mut seen = HashSet::new();
        for (from, to) in edges {
            if !seen.insert((from, to)) {
                continue;
            }
            forward.entry(from).or_default().push(to);
            backward.entry(to).or_default().push(from);
        }
        // Deterministic traversal order
        for targets in forward.values_mut() {
            targets.sort();
        }
        for sources in backward.values_mut() {
            sources.sort();
        }
        Self { forward, backward }
    }

    /// Direct dependents of `node`
    pub fn dependents(&self, node: N) -> &[N] {
        self.forward.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct prerequisites of `node`
    pub fn prerequisites(&self, node: N) -> &[N] {
        self.backward.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Shortest forward path from `start` to `target` (both included), if any.
    ///
    /// Breadth-first over forward edges, recording parents so the path can
    /// be reported back to the caller.
    pub fn path(&self, start: N, target: N) -> Option<Vec<N>> {
        if start == target {
            return Some(vec![start]);
        }
        let mut parent: HashMap<N, N> = HashMap::new();
        let mut visited: HashSet<N> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for &next in self.dependents(node) {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, node);
                if next == target {
                    let mut path = vec![target];
                    let mut cursor = target;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbours() {
        let graph = DependencyGraph::from_edges([(1, 2), (1, 3), (3, 4), (2, 4)]);
        assert_eq!(graph.dependents(1), &[2, 3]);
        assert_eq!(graph.prerequisites(4), &[2, 3]);
        assert!(graph.prerequisites(1).is_empty());
        assert!(graph.dependents(4).is_empty());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = DependencyGraph::from_edges([(1, 2), (1, 2)]);
        assert_eq!(graph.dependents(1), &[2]);
        assert_eq!(graph.prerequisites(2), &[1]);
    }

    #[test]
    fn test_path_is_shortest() {
        let graph = DependencyGraph::from_edges([(1, 2), (2, 3), (3, 4), (1, 4)]);
        assert_eq!(graph.path(1, 4), Some(vec![1, 4]));
        assert_eq!(graph.path(2, 4), Some(vec![2, 3, 4]));
        assert_eq!(graph.path(4, 1), None);
        assert_eq!(graph.path(3, 1), None);
    }
}
