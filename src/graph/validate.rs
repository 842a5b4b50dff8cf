use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::Hash;
use crate::error::WorkflowError;
use crate::models::TemplateId;
use super::DependencyGraph;

/// Check whether `from -> to` may be added to a template's edge set.
///
/// Rejects, in this order: self-loops, endpoints outside `stages`, and edges
/// that would close a cycle. The cycle test walks forward from `to` over the
/// existing edges; if `from` is reachable, the new edge closes the loop.
///
/// An edge already present in `existing` passes (it changes nothing).
pub fn validate_edge<N>(
    template_id: TemplateId,
    from: N,
    to: N,
    stages: &HashSet<N>,
    existing: &[(N, N)],
) -> Result<(), WorkflowError>
where
    N: Copy + Eq + Hash + Ord + Into<i64>,
{
    if from == to {
        return Err(WorkflowError::SelfLoop { stage_id: from.into() });
    }
    for stage in [from, to] {
        if !stages.contains(&stage) {
            return Err(WorkflowError::UnknownStage {
                template_id,
                stage_id: stage.into(),
            });
        }
    }

    let graph = DependencyGraph::from_edges(existing.iter().copied());
    if let Some(back) = graph.path(to, from) {
        let mut path: Vec<i64> = Vec::with_capacity(back.len() + 1);
        path.push(from.into());
        path.extend(back.into_iter().map(Into::into));
        return Err(WorkflowError::CycleDetected { path });
    }
    Ok(())
}

/// Find a cycle in a whole edge set.
///
/// Kahn's algorithm peels off nodes with no remaining prerequisites. Any node
/// left afterwards still has a prerequisite among the leftovers, so walking
/// prerequisites from one of them must revisit a node; that loop is returned
/// in forward order with its first node repeated at the end.
pub fn find_cycle<N>(nodes: impl IntoIterator<Item = N>, edges: &[(N, N)]) -> Option<Vec<N>>
where
    N: Copy + Eq + Hash + Ord,
{
    let graph = DependencyGraph::from_edges(edges.iter().copied());

    let mut all: BTreeSet<N> = nodes.into_iter().collect();
    for &(from, to) in edges {
        all.insert(from);
        all.insert(to);
    }

    let mut in_degree: BTreeMap<N, usize> = all
        .iter()
        .map(|&n| (n, graph.prerequisites(n).len()))
        .collect();
    let mut ready: Vec<N> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();

    while let Some(node) = ready.pop() {
        in_degree.remove(&node);
        for &next in graph.dependents(node) {
            if let Some(d) = in_degree.get_mut(&next) {
                *d -= 1;
                if *d == 0 {
                    ready.push(next);
                }
            }
        }
    }

    let start = *in_degree.keys().next()?;
    let mut trail = vec![start];
    let mut cursor = start;
    loop {
        let prev = graph
            .prerequisites(cursor)
            .iter()
            .copied()
            .find(|p| in_degree.contains_key(p))?;
        if let Some(idx) = trail.iter().position(|&n| n == prev) {
            // trail[idx..] walks the cycle backwards
            let mut cycle: Vec<N> = trail[idx..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return Some(cycle);
        }
        trail.push(prev);
        cursor = prev;
    }
}
