use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use anyhow::{Context, Result};
use crate::error::WorkflowError;
use crate::graph;
use crate::models::{
    DependencyEntry, ProcessTemplate, StageDefId, StageEntry, TemplateDocument, TemplateId,
};
use crate::repo::{now_ts, write_tx, DependencyRepo, StageDefinitionRepo};

/// Process template repository
///
/// Manages templates as a whole:
/// - Creating, renaming, activating/deactivating and deleting templates
/// - Exporting a template (stages and edges) as a portable document
/// - Importing a document, validating every edge on the way in
/// - Checking stored rows for dependency cycles
///
/// Deleting a template cascades to its stage definitions and dependencies.
/// Projects that adopted it keep their stages; only their link is cleared.
///
/// # Example
///
/// ```no_run
/// use procflow::db::DbConnection;
/// use procflow::repo::TemplateRepo;
///
/// let conn = DbConnection::connect().unwrap();
/// let template = TemplateRepo::create(&conn, "kitchen").unwrap();
/// TemplateRepo::set_active(&conn, template.id, false).unwrap();
/// ```
pub struct TemplateRepo;

const TEMPLATE_COLUMNS: &str = "id, name, is_active, created_ts, modified_ts";

fn row_to_template(row: &Row) -> rusqlite::Result<ProcessTemplate> {
    Ok(ProcessTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get::<_, i64>(2)? != 0,
        created_ts: row.get(3)?,
        modified_ts: row.get(4)?,
    })
}

impl TemplateRepo {
    /// Create a new, active template
    pub fn create(conn: &Connection, name: &str) -> Result<ProcessTemplate> {
        let now = now_ts();
        conn.execute(
            "INSERT INTO process_templates (name, is_active, created_ts, modified_ts)
             VALUES (?1, 1, ?2, ?3)",
            rusqlite::params![name, now, now],
        )
        .with_context(|| format!("Failed to create template: {}", name))?;

        let id = TemplateId(conn.last_insert_rowid());
        log::debug!("Created template {} '{}'", id, name);
        Ok(ProcessTemplate {
            id,
            name: name.to_string(),
            is_active: true,
            created_ts: now,
            modified_ts: now,
        })
    }

    /// Get template by ID
    pub fn get_by_id(conn: &Connection, id: TemplateId) -> Result<Option<ProcessTemplate>> {
        Ok(Self::fetch(conn, id)?)
    }

    pub(crate) fn fetch(conn: &Connection, id: TemplateId) -> rusqlite::Result<Option<ProcessTemplate>> {
        conn.query_row(
            &format!("SELECT {} FROM process_templates WHERE id = ?1", TEMPLATE_COLUMNS),
            [id],
            row_to_template,
        )
        .optional()
    }

    /// Get template by name
    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<ProcessTemplate>> {
        let template = conn
            .query_row(
                &format!("SELECT {} FROM process_templates WHERE name = ?1", TEMPLATE_COLUMNS),
                [name],
                row_to_template,
            )
            .optional()?;
        Ok(template)
    }

    /// List templates by name (optionally including inactive ones)
    pub fn list(conn: &Connection, include_inactive: bool) -> Result<Vec<ProcessTemplate>> {
        let query = if include_inactive {
            format!("SELECT {} FROM process_templates ORDER BY name", TEMPLATE_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM process_templates WHERE is_active = 1 ORDER BY name",
                TEMPLATE_COLUMNS
            )
        };

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map([], row_to_template)?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?);
        }
        Ok(templates)
    }

    /// Rename a template
    pub fn rename(conn: &Connection, id: TemplateId, new_name: &str) -> Result<()> {
        let updated = conn
            .execute(
                "UPDATE process_templates SET name = ?1, modified_ts = ?2 WHERE id = ?3",
                rusqlite::params![new_name, now_ts(), id],
            )
            .with_context(|| format!("Failed to rename template {} to {}", id, new_name))?;

        if updated == 0 {
            return Err(WorkflowError::TemplateNotFound(id).into());
        }
        Ok(())
    }

    /// Activate or deactivate a template. Inactive templates cannot be applied to projects.
    pub fn set_active(conn: &Connection, id: TemplateId, active: bool) -> Result<()> {
        let updated = conn.execute(
            "UPDATE process_templates SET is_active = ?1, modified_ts = ?2 WHERE id = ?3",
            rusqlite::params![active as i64, now_ts(), id],
        )?;

        if updated == 0 {
            return Err(WorkflowError::TemplateNotFound(id).into());
        }
        log::info!("Template {} {}", id, if active { "activated" } else { "deactivated" });
        Ok(())
    }

    /// Delete a template with its stages and dependencies
    pub fn delete(conn: &Connection, id: TemplateId) -> Result<()> {
        let deleted = conn
            .execute("DELETE FROM process_templates WHERE id = ?1", [id])
            .with_context(|| format!("Failed to delete template {}", id))?;

        if deleted == 0 {
            return Err(WorkflowError::TemplateNotFound(id).into());
        }
        log::info!("Deleted template {}", id);
        Ok(())
    }

    /// Bump modified_ts after a change to the template's stages or edges
    pub(crate) fn touch(conn: &Connection, id: TemplateId) -> rusqlite::Result<()> {
        conn.execute(
            "UPDATE process_templates SET modified_ts = ?1 WHERE id = ?2",
            rusqlite::params![now_ts(), id],
        )?;
        Ok(())
    }

    /// Look for a dependency cycle in the stored rows of a template.
    ///
    /// Edges admitted through [`DependencyRepo::add`] can never form one; this
    /// catches rows written by other means.
    pub fn find_cycle(conn: &Connection, id: TemplateId) -> Result<Option<Vec<StageDefId>>, WorkflowError> {
        if Self::fetch(conn, id)?.is_none() {
            return Err(WorkflowError::TemplateNotFound(id));
        }
        let stages = StageDefinitionRepo::load_ids(conn, id)?;
        let edges: Vec<(StageDefId, StageDefId)> = DependencyRepo::load(conn, id)?
            .iter()
            .map(|d| d.as_edge())
            .collect();
        Ok(graph::find_cycle(stages, &edges))
    }

    /// Export a template as a portable document. Stage keys are the definition ids.
    pub fn export(conn: &Connection, id: TemplateId) -> Result<TemplateDocument> {
        let template = Self::get_by_id(conn, id)?
            .ok_or(WorkflowError::TemplateNotFound(id))?;
        let stages = StageDefinitionRepo::list_for_template(conn, id)?;
        let edges = DependencyRepo::list_for_template(conn, id)?;

        Ok(TemplateDocument {
            name: template.name,
            active: template.is_active,
            stages: stages
                .into_iter()
                .map(|s| StageEntry {
                    key: s.id.get(),
                    name: s.name,
                    position: s.position,
                    duration_days: s.duration_days,
                    cost: s.cost,
                })
                .collect(),
            dependencies: edges
                .into_iter()
                .map(|e| DependencyEntry {
                    from: e.prerequisite_id.get(),
                    to: e.dependent_id.get(),
                })
                .collect(),
        })
    }

    /// Create a template from a document in a single transaction.
    ///
    /// Every dependency goes through the edge validator against the edges
    /// imported before it; the first rejection aborts the whole import.
    /// Stage keys must be unique within the document. Dependency keys that
    /// match no stage are reported as `UnknownStage` with the document key as
    /// the stage id.
    pub fn import(conn: &Connection, doc: &TemplateDocument) -> Result<ProcessTemplate, WorkflowError> {
        let mut seen = HashSet::with_capacity(doc.stages.len());
        if let Some(entry) = doc.stages.iter().find(|e| !seen.insert(e.key)) {
            return Err(WorkflowError::DuplicateStageKey { key: entry.key });
        }

        let tx = write_tx(conn)?;
        let now = now_ts();

        tx.execute(
            "INSERT INTO process_templates (name, is_active, created_ts, modified_ts)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![doc.name, doc.active as i64, now, now],
        )?;
        let template_id = TemplateId(tx.last_insert_rowid());

        let mut key_to_id: HashMap<i64, StageDefId> = HashMap::new();
        for entry in &doc.stages {
            tx.execute(
                "INSERT INTO stage_definitions (template_id, name, position, duration_days, cost, created_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    template_id,
                    entry.name,
                    entry.position,
                    entry.duration_days,
                    entry.cost,
                    now
                ],
            )?;
            key_to_id.insert(entry.key, StageDefId(tx.last_insert_rowid()));
        }

        let stage_ids: HashSet<StageDefId> = key_to_id.values().copied().collect();
        let mut accepted: Vec<(StageDefId, StageDefId)> = Vec::new();
        for dep in &doc.dependencies {
            if dep.from == dep.to {
                return Err(WorkflowError::SelfLoop { stage_id: dep.from });
            }
            let lookup = |key: i64| {
                key_to_id.get(&key).copied().ok_or(WorkflowError::UnknownStage {
                    template_id,
                    stage_id: key,
                })
            };
            let (from, to) = (lookup(dep.from)?, lookup(dep.to)?);

            graph::validate_edge(template_id, from, to, &stage_ids, &accepted)?;
            if !accepted.contains(&(from, to)) {
                DependencyRepo::insert(&tx, template_id, from, to, now)?;
                accepted.push((from, to));
            }
        }

        tx.commit()?;
        log::info!(
            "Imported template {} '{}' with {} stages and {} dependencies",
            template_id,
            doc.name,
            key_to_id.len(),
            accepted.len()
        );

        Ok(ProcessTemplate {
            id: template_id,
            name: doc.name.clone(),
            is_active: doc.active,
            created_ts: now,
            modified_ts: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;
    use crate::models::NewStage;

    #[test]
    fn test_create_template() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap();

        assert_eq!(template.name, "kitchen");
        assert!(template.is_active);
        let fetched = TemplateRepo::get_by_id(&conn, template.id).unwrap().unwrap();
        assert_eq!(fetched, template);
    }

    #[test]
    fn test_create_duplicate_template() {
        let conn = DbConnection::connect_in_memory().unwrap();
        TemplateRepo::create(&conn, "kitchen").unwrap();

        // Should fail due to unique constraint
        assert!(TemplateRepo::create(&conn, "kitchen").is_err());
    }

    #[test]
    fn test_list_hides_inactive() {
        let conn = DbConnection::connect_in_memory().unwrap();
        TemplateRepo::create(&conn, "wardrobe").unwrap();
        let old = TemplateRepo::create(&conn, "cabinet").unwrap();
        TemplateRepo::set_active(&conn, old.id, false).unwrap();

        let active = TemplateRepo::list(&conn, false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "wardrobe");

        let all = TemplateRepo::list(&conn, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "cabinet");
    }

    #[test]
    fn test_rename_and_lookup_by_name() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap();
        TemplateRepo::rename(&conn, template.id, "kitchen-v2").unwrap();

        assert!(TemplateRepo::get_by_name(&conn, "kitchen").unwrap().is_none());
        let renamed = TemplateRepo::get_by_name(&conn, "kitchen-v2").unwrap().unwrap();
        assert_eq!(renamed.id, template.id);
    }

    #[test]
    fn test_missing_template_operations_fail() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let missing = TemplateId(404);

        let err = TemplateRepo::rename(&conn, missing, "x").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::TemplateNotFound(_))
        ));
        assert!(TemplateRepo::set_active(&conn, missing, true).is_err());
        assert!(TemplateRepo::delete(&conn, missing).is_err());
    }

    #[test]
    fn test_delete_cascades_to_stages_and_edges() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap();
        let a = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("Measure")).unwrap();
        let b = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("Design")).unwrap();
        DependencyRepo::add(&conn, template.id, a.id, b.id).unwrap();

        TemplateRepo::delete(&conn, template.id).unwrap();

        assert!(TemplateRepo::get_by_id(&conn, template.id).unwrap().is_none());
        assert!(StageDefinitionRepo::get(&conn, a.id).unwrap().is_none());
        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage_dependencies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[test]
    fn test_export_then_import_into_new_template() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap();
        let a = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("Measure")).unwrap();
        let b = StageDefinitionRepo::create(
            &conn,
            template.id,
            &NewStage { name: "Design".into(), duration_days: Some(5), ..Default::default() },
        )
        .unwrap();
        DependencyRepo::add(&conn, template.id, a.id, b.id).unwrap();

        let mut doc = TemplateRepo::export(&conn, template.id).unwrap();
        assert_eq!(doc.stages.len(), 2);
        assert_eq!(doc.dependencies, vec![DependencyEntry { from: a.id.get(), to: b.id.get() }]);

        doc.name = "kitchen-copy".to_string();
        let copy = TemplateRepo::import(&conn, &doc).unwrap();
        assert_ne!(copy.id, template.id);

        let stages = StageDefinitionRepo::list_for_template(&conn, copy.id).unwrap();
        assert_eq!(
            stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["Measure", "Design"]
        );
        assert_eq!(stages[1].duration_days, Some(5));
        let edges = DependencyRepo::list_for_template(&conn, copy.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].prerequisite_id, stages[0].id);
        assert_eq!(edges[0].dependent_id, stages[1].id);
    }

    #[test]
    fn test_import_rejects_repeated_stage_key() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let doc = TemplateDocument {
            name: "kitchen".to_string(),
            active: true,
            stages: vec![
                StageEntry { key: 1, name: "Measure".into(), position: 1, duration_days: None, cost: None },
                StageEntry { key: 1, name: "Design".into(), position: 2, duration_days: None, cost: None },
                StageEntry { key: 2, name: "Approval".into(), position: 3, duration_days: None, cost: None },
            ],
            dependencies: vec![DependencyEntry { from: 1, to: 2 }],
        };

        let err = TemplateRepo::import(&conn, &doc).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateStageKey { key: 1 }));
        assert!(err.is_user_error());

        assert!(TemplateRepo::get_by_name(&conn, "kitchen").unwrap().is_none());
        let stages: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage_definitions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stages, 0);
        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage_dependencies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[test]
    fn test_import_with_cycle_leaves_nothing_behind() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let doc = TemplateDocument {
            name: "loop".to_string(),
            active: true,
            stages: vec![
                StageEntry { key: 1, name: "A".into(), position: 1, duration_days: None, cost: None },
                StageEntry { key: 2, name: "B".into(), position: 2, duration_days: None, cost: None },
            ],
            dependencies: vec![DependencyEntry { from: 1, to: 2 }, DependencyEntry { from: 2, to: 1 }],
        };

        let err = TemplateRepo::import(&conn, &doc).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected { .. }));
        assert!(TemplateRepo::get_by_name(&conn, "loop").unwrap().is_none());
        let stages: i64 = conn
            .query_row("SELECT COUNT(*) FROM stage_definitions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stages, 0);
    }

    #[test]
    fn test_import_rejects_unknown_key() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let doc = TemplateDocument {
            name: "dangling".to_string(),
            active: true,
            stages: vec![StageEntry { key: 1, name: "A".into(), position: 1, duration_days: None, cost: None }],
            dependencies: vec![DependencyEntry { from: 1, to: 9 }],
        };

        let err = TemplateRepo::import(&conn, &doc).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStage { stage_id: 9, .. }));
        assert!(TemplateRepo::list(&conn, true).unwrap().is_empty());
    }

    #[test]
    fn test_find_cycle_on_stored_rows() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap();
        let a = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("A")).unwrap();
        let b = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("B")).unwrap();
        DependencyRepo::add(&conn, template.id, a.id, b.id).unwrap();
        assert_eq!(TemplateRepo::find_cycle(&conn, template.id).unwrap(), None);

        // Bypass the validator
        conn.execute(
            "INSERT INTO stage_dependencies (template_id, prerequisite_id, dependent_id, created_ts)
             VALUES (?1, ?2, ?3, 0)",
            rusqlite::params![template.id, b.id, a.id],
        )
        .unwrap();
        let cycle = TemplateRepo::find_cycle(&conn, template.id).unwrap().unwrap();
        assert_eq!(cycle.len(), 3);
    }
}
