use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashSet;
use anyhow::{Context, Result};
use crate::error::WorkflowError;
use crate::models::{NewStage, StageDefId, StageDefinition, StageUpdate, TemplateId};
use crate::repo::{now_ts, TemplateRepo};

/// Stage definition repository
///
/// Stages are listed in `position` order. Positions are not required to be
/// unique; equal positions fall back to creation order (row id).
pub struct StageDefinitionRepo;

const STAGE_COLUMNS: &str =
    "id, template_id, name, position, duration_days, cost, created_ts";

fn row_to_stage(row: &Row) -> rusqlite::Result<StageDefinition> {
    Ok(StageDefinition {
        id: row.get(0)?,
        template_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        duration_days: row.get(4)?,
        cost: row.get(5)?,
        created_ts: row.get(6)?,
    })
}

impl StageDefinitionRepo {
    /// Add a stage to a template.
    ///
    /// Without an explicit position the stage is appended after the current
    /// last one (the first stage of a template gets position 1).
    pub fn create(conn: &Connection, template_id: TemplateId, stage: &NewStage) -> Result<StageDefinition> {
        if TemplateRepo::fetch(conn, template_id)?.is_none() {
            return Err(WorkflowError::TemplateNotFound(template_id).into());
        }

        let position = match stage.position {
            Some(p) => p,
            None => conn.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM stage_definitions WHERE template_id = ?1",
                [template_id],
                |row| row.get(0),
            )?,
        };
        let now = now_ts();

        conn.execute(
            "INSERT INTO stage_definitions (template_id, name, position, duration_days, cost, created_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                template_id,
                stage.name,
                position,
                stage.duration_days,
                stage.cost,
                now
            ],
        )
        .with_context(|| format!("Failed to add stage '{}' to template {}", stage.name, template_id))?;
        let id = StageDefId(conn.last_insert_rowid());
        TemplateRepo::touch(conn, template_id)?;

        log::debug!("Added stage {} '{}' at position {} to template {}", id, stage.name, position, template_id);
        Ok(StageDefinition {
            id,
            template_id,
            name: stage.name.clone(),
            position,
            duration_days: stage.duration_days,
            cost: stage.cost,
            created_ts: now,
        })
    }

    /// Get stage definition by ID
    pub fn get(conn: &Connection, id: StageDefId) -> Result<Option<StageDefinition>> {
        let stage = conn
            .query_row(
                &format!("SELECT {} FROM stage_definitions WHERE id = ?1", STAGE_COLUMNS),
                [id],
                row_to_stage,
            )
            .optional()?;
        Ok(stage)
    }

    /// List a template's stages in workflow order
    pub fn list_for_template(conn: &Connection, template_id: TemplateId) -> Result<Vec<StageDefinition>> {
        Ok(Self::load(conn, template_id)?)
    }

    pub(crate) fn load(conn: &Connection, template_id: TemplateId) -> rusqlite::Result<Vec<StageDefinition>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_definitions WHERE template_id = ?1 ORDER BY position, id",
            STAGE_COLUMNS
        ))?;
        let rows = stmt.query_map([template_id], row_to_stage)?;

        let mut stages = Vec::new();
        for row in rows {
            stages.push(row?);
        }
        Ok(stages)
    }

    /// Member set of a template's stages
    pub(crate) fn load_ids(conn: &Connection, template_id: TemplateId) -> rusqlite::Result<HashSet<StageDefId>> {
        let mut stmt = conn.prepare("SELECT id FROM stage_definitions WHERE template_id = ?1")?;
        let rows = stmt.query_map([template_id], |row| row.get::<_, StageDefId>(0))?;
        rows.collect()
    }

    /// Apply a partial update and return the updated stage
    pub fn update(conn: &Connection, id: StageDefId, update: &StageUpdate) -> Result<StageDefinition> {
        let existing = Self::get(conn, id)?
            .ok_or(WorkflowError::StageNotFound(id.get()))?;
        if update.is_empty() {
            return Ok(existing);
        }

        let updated = StageDefinition {
            name: update.name.clone().unwrap_or(existing.name),
            position: update.position.unwrap_or(existing.position),
            duration_days: update.duration_days.unwrap_or(existing.duration_days),
            cost: update.cost.unwrap_or(existing.cost),
            ..existing
        };

        conn.execute(
            "UPDATE stage_definitions SET name = ?1, position = ?2, duration_days = ?3, cost = ?4
             WHERE id = ?5",
            rusqlite::params![
                updated.name,
                updated.position,
                updated.duration_days,
                updated.cost,
                id
            ],
        )
        .with_context(|| format!("Failed to update stage {}", id))?;
        TemplateRepo::touch(conn, updated.template_id)?;

        Ok(updated)
    }

    /// Delete a stage definition. Its dependency edges go with it; project
    /// stages copied from it are kept.
    pub fn delete(conn: &Connection, id: StageDefId) -> Result<()> {
        let stage = Self::get(conn, id)?
            .ok_or(WorkflowError::StageNotFound(id.get()))?;

        conn.execute("DELETE FROM stage_definitions WHERE id = ?1", [id])
            .with_context(|| format!("Failed to delete stage {}", id))?;
        TemplateRepo::touch(conn, stage.template_id)?;

        log::debug!("Deleted stage {} from template {}", id, stage.template_id);
        Ok(())
    }
}
