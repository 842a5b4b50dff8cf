use thiserror::Error;
use crate::models::{ProjectId, StageInstanceId, StageStatus, TemplateId};

/// Errors raised by the stage graph core.
///
/// Every operation that returns one of these has rolled back its
/// transaction, so persisted state is unchanged.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Stage {stage_id} cannot depend on itself")]
    SelfLoop { stage_id: i64 },

    #[error("Stage {stage_id} does not belong to template {template_id}")]
    UnknownStage { template_id: TemplateId, stage_id: i64 },

    #[error("Dependency would create a cycle: {}", format_path(.path))]
    CycleDetected { path: Vec<i64> },

    #[error("Stage key {key} appears more than once in the template document")]
    DuplicateStageKey { key: i64 },

    #[error("Template {template_id} has no stages")]
    TemplateEmpty { template_id: TemplateId },

    #[error("Template {0} not found")]
    TemplateNotFound(TemplateId),

    #[error("Template {0} is inactive")]
    TemplateInactive(TemplateId),

    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("Stage {0} not found")]
    StageNotFound(i64),

    #[error("Project {project_id} already has stages")]
    AlreadyInstantiated { project_id: ProjectId },

    #[error("Stage {stage_id} cannot move from {from} to {to}")]
    InvalidTransition {
        stage_id: StageInstanceId,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("Stage {stage_id} is waiting on stages {}", format_list(.waiting_on))]
    Blocked {
        stage_id: StageInstanceId,
        waiting_on: Vec<StageInstanceId>,
    },

    #[error("Storage error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl WorkflowError {
    /// Validation and precondition failures caused by the request itself,
    /// as opposed to storage failures.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, WorkflowError::Persistence(_))
    }
}

fn format_path<T: std::fmt::Display>(ids: &[T]) -> String {
    join_ids(ids, " -> ")
}

fn format_list<T: std::fmt::Display>(ids: &[T]) -> String {
    join_ids(ids, ", ")
}

fn join_ids<T: std::fmt::Display>(ids: &[T], sep: &str) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}
