use rusqlite::{Connection, Result};
use std::collections::HashMap;

/// Current database schema version
const CURRENT_VERSION: u32 = 2;

/// Migration system for managing database schema versions
pub struct MigrationManager;

impl MigrationManager {
    /// Initialize the database with the current schema
    /// This creates the schema_version table and applies all migrations
    pub fn initialize(conn: &Connection) -> Result<()> {
        // Create schema_version table to track migrations
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        // Get current version
        let current_version: u32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        // Apply migrations up to current version
        for version in (current_version + 1)..=CURRENT_VERSION {
            Self::apply_migration(conn, version)?;
        }

        Ok(())
    }

    /// Apply a specific migration by version number
    fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
        let migrations = get_migrations();
        if let Some(migration) = migrations.get(&version) {
            // Execute migration in a transaction
            let tx = conn.unchecked_transaction()?;
            migration(&tx)?;
            tx.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [version],
            )?;
            tx.commit()?;
            log::debug!("Applied schema migration v{}", version);
            Ok(())
        } else {
            Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some(format!("No migration found for version {}", version)),
            ))
        }
    }

    /// Get the current schema version
    pub fn get_version(conn: &Connection) -> Result<u32> {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }
}

/// Get all migrations indexed by version
fn get_migrations() -> HashMap<u32, fn(&rusqlite::Transaction) -> Result<(), rusqlite::Error>> {
    let mut migrations: HashMap<u32, fn(&rusqlite::Transaction) -> Result<(), rusqlite::Error>> = HashMap::new();
    migrations.insert(1, migration_v1);
    migrations.insert(2, migration_v2);
    migrations
}

/// Migration v1: Process templates, stage definitions and their dependencies
fn migration_v1(tx: &rusqlite::Transaction) -> Result<(), rusqlite::Error> {
    tx.execute(
        "CREATE TABLE process_templates (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_ts INTEGER NOT NULL,
            modified_ts INTEGER NOT NULL
        )",
        [],
    )?;

    // UNIQUE(template_id, id) is the parent key for the same-template
    // foreign keys on stage_dependencies.
    tx.execute(
        "CREATE TABLE stage_definitions (
            id INTEGER PRIMARY KEY,
            template_id INTEGER NOT NULL REFERENCES process_templates(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            duration_days INTEGER NULL CHECK(duration_days IS NULL OR duration_days >= 0),
            cost REAL NULL CHECK(cost IS NULL OR cost >= 0),
            created_ts INTEGER NOT NULL,
            UNIQUE(template_id, id)
        )",
        [],
    )?;
    // Note: position is not UNIQUE. Readers order by (position, id) so that
    // duplicate positions fall back to creation order.
    tx.execute(
        "CREATE INDEX idx_stage_definitions_template_position
         ON stage_definitions(template_id, position)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE stage_dependencies (
            template_id INTEGER NOT NULL REFERENCES process_templates(id) ON DELETE CASCADE,
            prerequisite_id INTEGER NOT NULL,
            dependent_id INTEGER NOT NULL,
            created_ts INTEGER NOT NULL,
            PRIMARY KEY(prerequisite_id, dependent_id),
            CHECK(prerequisite_id <> dependent_id),
            FOREIGN KEY(template_id, prerequisite_id)
                REFERENCES stage_definitions(template_id, id) ON DELETE CASCADE,
            FOREIGN KEY(template_id, dependent_id)
                REFERENCES stage_definitions(template_id, id) ON DELETE CASCADE
        )",
        [],
    )?;
    tx.execute(
        "CREATE INDEX idx_stage_dependencies_template ON stage_dependencies(template_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX idx_stage_dependencies_dependent ON stage_dependencies(dependent_id)",
        [],
    )?;
    // Note: acyclicity cannot be expressed as a constraint; it is enforced by
    // the validator inside the inserting transaction.

    Ok(())
}

/// Migration v2: Projects and their instantiated stage graphs
fn migration_v2(tx: &rusqlite::Transaction) -> Result<(), rusqlite::Error> {
    tx.execute(
        "CREATE TABLE projects (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            template_id INTEGER NULL REFERENCES process_templates(id) ON DELETE SET NULL,
            created_ts INTEGER NOT NULL
        )",
        [],
    )?;

    // Instances are copies: definition_id only records provenance and is
    // cleared if the definition goes away.
    tx.execute(
        "CREATE TABLE project_stages (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            definition_id INTEGER NULL REFERENCES stage_definitions(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            duration_days INTEGER NULL,
            cost REAL NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending','in_progress','completed')),
            created_ts INTEGER NOT NULL,
            modified_ts INTEGER NOT NULL,
            started_ts INTEGER NULL,
            completed_ts INTEGER NULL,
            UNIQUE(project_id, id)
        )",
        [],
    )?;
    tx.execute(
        "CREATE INDEX idx_project_stages_project_position
         ON project_stages(project_id, position)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE project_stage_dependencies (
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            prerequisite_id INTEGER NOT NULL,
            dependent_id INTEGER NOT NULL,
            PRIMARY KEY(prerequisite_id, dependent_id),
            CHECK(prerequisite_id <> dependent_id),
            FOREIGN KEY(project_id, prerequisite_id)
                REFERENCES project_stages(project_id, id) ON DELETE CASCADE,
            FOREIGN KEY(project_id, dependent_id)
                REFERENCES project_stages(project_id, id) ON DELETE CASCADE
        )",
        [],
    )?;
    tx.execute(
        "CREATE INDEX idx_project_stage_dependencies_project
         ON project_stage_dependencies(project_id)",
        [],
    )?;
    tx.execute(
        "CREATE INDEX idx_project_stage_dependencies_dependent
         ON project_stage_dependencies(dependent_id)",
        [],
    )?;

    Ok(())
}
