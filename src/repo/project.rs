use rusqlite::{Connection, OptionalExtension, Row};
use crate::error::WorkflowError;
use crate::models::{Project, ProjectId};
use anyhow::{Context, Result};

/// Project repository for database operations
///
/// Projects own their stage instances; deleting a project removes its whole
/// stage graph.
///
/// # Example
///
/// ```no_run
/// use procflow::db::DbConnection;
/// use procflow::repo::ProjectRepo;
///
/// let conn = DbConnection::connect().unwrap();
/// let project = ProjectRepo::create(&conn, "smith-kitchen").unwrap();
/// ```
pub struct ProjectRepo;

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        template_id: row.get(2)?,
        created_ts: row.get(3)?,
    })
}

impl ProjectRepo {
    /// Create a new project
    pub fn create(conn: &Connection, name: &str) -> Result<Project> {
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO projects (name, created_ts) VALUES (?1, ?2)",
            rusqlite::params![name, now],
        )
        .with_context(|| format!("Failed to create project: {}", name))?;

        let id = ProjectId(conn.last_insert_rowid());
        Ok(Project {
            id,
            name: name.to_string(),
            template_id: None,
            created_ts: now,
        })
    }

    /// Get project by ID
    pub fn get_by_id(conn: &Connection, id: ProjectId) -> Result<Option<Project>> {
        Ok(Self::fetch(conn, id)?)
    }

    pub(crate) fn fetch(conn: &Connection, id: ProjectId) -> rusqlite::Result<Option<Project>> {
        conn.query_row(
            "SELECT id, name, template_id, created_ts FROM projects WHERE id = ?1",
            [id],
            row_to_project,
        )
        .optional()
    }

    /// Get project by name
    pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Project>> {
        let project = conn
            .query_row(
                "SELECT id, name, template_id, created_ts FROM projects WHERE name = ?1",
                [name],
                row_to_project,
            )
            .optional()?;
        Ok(project)
    }

    /// List all projects by name
    pub fn list(conn: &Connection) -> Result<Vec<Project>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, template_id, created_ts FROM projects ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_project)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }

        Ok(projects)
    }

    /// Delete a project and its stage graph
    pub fn delete(conn: &Connection, id: ProjectId) -> Result<()> {
        let rows_affected = conn
            .execute("DELETE FROM projects WHERE id = ?1", [id])
            .with_context(|| format!("Failed to delete project {}", id))?;

        if rows_affected == 0 {
            return Err(WorkflowError::ProjectNotFound(id).into());
        }

        Ok(())
    }
}
