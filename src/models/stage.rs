use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use super::ids::{ProjectId, StageDefId, StageInstanceId};

/// Project stage status (lifecycle state)
///
/// - Pending: not started; may or may not be eligible
/// - InProgress: started, work under way
/// - Completed: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "in_progress" => Some(StageStatus::InProgress),
            "completed" => Some(StageStatus::Completed),
            _ => None,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::InProgress)
                | (StageStatus::InProgress, StageStatus::Completed)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for StageStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StageStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        StageStatus::from_str(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown stage status '{}'", s).into()))
    }
}

/// Concrete stage of a project, copied from a stage definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStageInstance {
    pub id: StageInstanceId,
    pub project_id: ProjectId,
    /// Source definition (NULL once the definition is deleted from its template)
    pub definition_id: Option<StageDefId>,
    pub name: String,
    pub position: i64,
    pub duration_days: Option<i64>,
    pub cost: Option<f64>,
    pub status: StageStatus,
    pub created_ts: i64,
    pub modified_ts: i64,
    pub started_ts: Option<i64>,
    pub completed_ts: Option<i64>,
}

/// Prerequisite edge between two stages of the same project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceDependency {
    pub project_id: ProjectId,
    pub prerequisite_id: StageInstanceId,
    pub dependent_id: StageInstanceId,
}

impl InstanceDependency {
    pub fn as_edge(&self) -> (StageInstanceId, StageInstanceId) {
        (self.prerequisite_id, self.dependent_id)
    }
}

/// Gate state of a stage instance, derived from statuses and edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// Pending and every prerequisite completed
    Eligible,
    /// Pending with unfinished prerequisites
    Blocked { waiting_on: Vec<StageInstanceId> },
    InProgress,
    Completed,
}

impl GateState {
    pub fn label(&self) -> &'static str {
        match self {
            GateState::Eligible => "eligible",
            GateState::Blocked { .. } => "blocked",
            GateState::InProgress => "in_progress",
            GateState::Completed => "completed",
        }
    }
}

/// One row of a project's stage board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageGate {
    pub stage: ProjectStageInstance,
    #[serde(flatten)]
    pub gate: GateState,
}

/// Result of applying a template to a project
#[derive(Debug, Clone, Serialize)]
pub struct InstantiatedGraph {
    pub project_id: ProjectId,
    /// Instances in template position order
    pub instances: Vec<ProjectStageInstance>,
    pub edges: Vec<InstanceDependency>,
    /// Definition id to the instance created from it
    pub mapping: HashMap<StageDefId, StageInstanceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_conversion() {
        assert_eq!(StageStatus::Pending.as_str(), "pending");
        assert_eq!(StageStatus::from_str("in_progress"), Some(StageStatus::InProgress));
        assert_eq!(StageStatus::from_str("completed"), Some(StageStatus::Completed));
        assert_eq!(StageStatus::from_str("done"), None);
    }

    #[test]
    fn test_transitions() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::InProgress));
        assert!(StageStatus::InProgress.can_transition_to(StageStatus::Completed));
        // No skipping in_progress, nothing leaves completed
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Completed));
        assert!(!StageStatus::Completed.can_transition_to(StageStatus::Pending));
        assert!(!StageStatus::Completed.can_transition_to(StageStatus::InProgress));
        assert!(!StageStatus::InProgress.can_transition_to(StageStatus::Pending));
    }

    #[test]
    fn test_status_serde_matches_column_values() {
        let json = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_gate_state_json_shape() {
        let gate = GateState::Blocked { waiting_on: vec![StageInstanceId(4)] };
        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["state"], "blocked");
        assert_eq!(json["waiting_on"][0], 4);
    }
}
