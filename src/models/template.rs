use serde::{Deserialize, Serialize};
use super::ids::{StageDefId, TemplateId};

/// Process template model
///
/// A reusable, named workflow definition. Stage definitions and dependency
/// edges are stored in their own tables and owned by the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTemplate {
    pub id: TemplateId,
    pub name: String,
    pub is_active: bool,
    pub created_ts: i64,
    pub modified_ts: i64,
}

/// One step of a template workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageDefId,
    pub template_id: TemplateId,
    pub name: String,
    pub position: i64,
    pub duration_days: Option<i64>,
    pub cost: Option<f64>,
    pub created_ts: i64,
}

/// Prerequisite edge between two stages of the same template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDependency {
    pub template_id: TemplateId,
    pub prerequisite_id: StageDefId,
    pub dependent_id: StageDefId,
}

impl StageDependency {
    pub fn as_edge(&self) -> (StageDefId, StageDefId) {
        (self.prerequisite_id, self.dependent_id)
    }
}

/// Attributes for a new stage definition
#[derive(Debug, Clone, Default)]
pub struct NewStage {
    pub name: String,
    /// Explicit position; `None` appends after the current last stage
    pub position: Option<i64>,
    pub duration_days: Option<i64>,
    pub cost: Option<f64>,
}

impl NewStage {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a stage definition. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub name: Option<String>,
    pub position: Option<i64>,
    pub duration_days: Option<Option<i64>>,
    pub cost: Option<Option<f64>>,
}

impl StageUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.position.is_none()
            && self.duration_days.is_none()
            && self.cost.is_none()
    }
}

/// Portable template document used by export/import.
///
/// Stages carry a document-local `key` and edges refer to those keys, so a
/// document can be loaded into another database where row ids differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub stages: Vec<StageEntry>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub key: i64,
    pub name: String,
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub from: i64,
    pub to: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_update_is_empty() {
        assert!(StageUpdate::default().is_empty());
        let update = StageUpdate {
            cost: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_document_defaults() {
        let doc: TemplateDocument = serde_json::from_str(
            r#"{"name": "kitchen", "stages": [{"key": 1, "name": "Measure", "position": 1}]}"#,
        )
        .unwrap();
        assert!(doc.active);
        assert!(doc.dependencies.is_empty());
        assert_eq!(doc.stages[0].duration_days, None);
    }
}
