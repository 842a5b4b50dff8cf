use serde::{Deserialize, Serialize};
use super::ids::{ProjectId, TemplateId};

/// Project model
///
/// Minimal stand-in for an ERP project: the owner of a stage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Template this project adopted, if any (NULL once that template is deleted)
    pub template_id: Option<TemplateId>,
    pub created_ts: i64,
}
