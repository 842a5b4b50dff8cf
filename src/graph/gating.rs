//! Stage gating
//!
//! Eligibility is always derived from the statuses and edges handed in; no
//! state survives between calls.

use std::collections::{BTreeSet, HashMap};
use crate::models::{
    GateState, InstanceDependency, ProjectStageInstance, StageGate, StageInstanceId, StageStatus,
};
use super::DependencyGraph;

/// Gate state of a single stage given the statuses of all project stages.
///
/// Prerequisites missing from `statuses` count as unfinished.
pub fn gate_for(
    stage: &ProjectStageInstance,
    graph: &DependencyGraph<StageInstanceId>,
    statuses: &HashMap<StageInstanceId, StageStatus>,
) -> GateState {
    match stage.status {
        StageStatus::InProgress => GateState::InProgress,
        StageStatus::Completed => GateState::Completed,
        StageStatus::Pending => {
            let waiting_on: Vec<StageInstanceId> = graph
                .prerequisites(stage.id)
                .iter()
                .copied()
                .filter(|p| statuses.get(p) != Some(&StageStatus::Completed))
                .collect();
            if waiting_on.is_empty() {
                GateState::Eligible
            } else {
                GateState::Blocked { waiting_on }
            }
        }
    }
}

/// Gate state of every stage, in the order the stages were given
pub fn evaluate(
    stages: &[ProjectStageInstance],
    edges: &[InstanceDependency],
) -> Vec<StageGate> {
    let graph = DependencyGraph::from_edges(edges.iter().map(InstanceDependency::as_edge));
    let statuses: HashMap<StageInstanceId, StageStatus> =
        stages.iter().map(|s| (s.id, s.status)).collect();

    stages
        .iter()
        .map(|stage| StageGate {
            gate: gate_for(stage, &graph, &statuses),
            stage: stage.clone(),
        })
        .collect()
}

/// Stages that may be started right now
pub fn eligible(
    stages: &[ProjectStageInstance],
    edges: &[InstanceDependency],
) -> BTreeSet<StageInstanceId> {
    evaluate(stages, edges)
        .into_iter()
        .filter(|g| g.gate == GateState::Eligible)
        .map(|g| g.stage.id)
        .collect()
}
