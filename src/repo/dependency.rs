use rusqlite::Connection;
use anyhow::{Context, Result};
use crate::error::WorkflowError;
use crate::graph;
use crate::models::{StageDefId, StageDependency, TemplateId};
use crate::repo::{now_ts, write_tx, StageDefinitionRepo, TemplateRepo};

/// Stage dependency repository
///
/// Every insertion runs the edge validator against the template's current
/// edge set inside a `BEGIN IMMEDIATE` transaction, so the stored graph is
/// acyclic after every commit, including under concurrent writers.
pub struct DependencyRepo;

impl DependencyRepo {
    /// Add `prerequisite -> dependent` to a template.
    ///
    /// Returns `Ok(true)` if the edge was inserted and `Ok(false)` if it was
    /// already present.
    pub fn add(
        conn: &Connection,
        template_id: TemplateId,
        prerequisite: StageDefId,
        dependent: StageDefId,
    ) -> Result<bool, WorkflowError> {
        let tx = write_tx(conn)?;

        if TemplateRepo::fetch(&tx, template_id)?.is_none() {
            return Err(WorkflowError::TemplateNotFound(template_id));
        }
        let stages = StageDefinitionRepo::load_ids(&tx, template_id)?;
        let existing: Vec<(StageDefId, StageDefId)> = Self::load(&tx, template_id)?
            .iter()
            .map(StageDependency::as_edge)
            .collect();

        if let Err(err) = graph::validate_edge(template_id, prerequisite, dependent, &stages, &existing) {
            log::warn!(
                "Rejected dependency {} -> {} on template {}: {}",
                prerequisite, dependent, template_id, err
            );
            return Err(err);
        }
        if existing.contains(&(prerequisite, dependent)) {
            return Ok(false);
        }

        Self::insert(&tx, template_id, prerequisite, dependent, now_ts())?;
        TemplateRepo::touch(&tx, template_id)?;
        tx.commit()?;

        log::debug!("Added dependency {} -> {} on template {}", prerequisite, dependent, template_id);
        Ok(true)
    }

    pub(crate) fn insert(
        conn: &Connection,
        template_id: TemplateId,
        prerequisite: StageDefId,
        dependent: StageDefId,
        created_ts: i64,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO stage_dependencies (template_id, prerequisite_id, dependent_id, created_ts)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![template_id, prerequisite, dependent, created_ts],
        )?;
        Ok(())
    }

    /// Remove an edge. Returns whether anything was deleted.
    ///
    /// Removing an edge can never introduce a cycle, so no validation runs.
    pub fn remove(
        conn: &Connection,
        template_id: TemplateId,
        prerequisite: StageDefId,
        dependent: StageDefId,
    ) -> Result<bool> {
        let deleted = conn
            .execute(
                "DELETE FROM stage_dependencies
                 WHERE template_id = ?1 AND prerequisite_id = ?2 AND dependent_id = ?3",
                rusqlite::params![template_id, prerequisite, dependent],
            )
            .with_context(|| {
                format!("Failed to remove dependency {} -> {}", prerequisite, dependent)
            })?;

        if deleted > 0 {
            TemplateRepo::touch(conn, template_id)?;
        }
        Ok(deleted > 0)
    }

    /// List a template's edges
    pub fn list_for_template(conn: &Connection, template_id: TemplateId) -> Result<Vec<StageDependency>> {
        Ok(Self::load(conn, template_id)?)
    }

    pub(crate) fn load(conn: &Connection, template_id: TemplateId) -> rusqlite::Result<Vec<StageDependency>> {
        let mut stmt = conn.prepare(
            "SELECT template_id, prerequisite_id, dependent_id
             FROM stage_dependencies WHERE template_id = ?1
             ORDER BY prerequisite_id, dependent_id",
        )?;
        let rows = stmt.query_map([template_id], |row| {
            Ok(StageDependency {
                template_id: row.get(0)?,
                prerequisite_id: row.get(1)?,
                dependent_id: row.get(2)?,
            })
        })?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }
}
