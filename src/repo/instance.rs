use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use crate::error::WorkflowError;
use crate::graph::{self, gating, DependencyGraph};
use crate::models::{
    GateState, InstanceDependency, InstantiatedGraph, ProjectId, ProjectStageInstance,
    StageDefId, StageGate, StageInstanceId, StageStatus, TemplateId,
};
use crate::repo::{now_ts, write_tx, DependencyRepo, ProjectRepo, StageDefinitionRepo, TemplateRepo};

/// Project stage repository
///
/// Covers the project side of the workflow:
/// - Instantiating a template into a project's own stage graph
/// - Gating queries (eligible / blocked stages, full board)
/// - Status transitions `pending -> in_progress -> completed`
///
/// Instantiation and transitions each run in a single `BEGIN IMMEDIATE`
/// transaction; on any error nothing is written. Gating queries read stages
/// and edges inside one read transaction and derive eligibility on the spot.
pub struct InstanceRepo;

const INSTANCE_COLUMNS: &str = "id, project_id, definition_id, name, position, duration_days, cost,
     status, created_ts, modified_ts, started_ts, completed_ts";

fn row_to_instance(row: &Row) -> rusqlite::Result<ProjectStageInstance> {
    Ok(ProjectStageInstance {
        id: row.get(0)?,
        project_id: row.get(1)?,
        definition_id: row.get(2)?,
        name: row.get(3)?,
        position: row.get(4)?,
        duration_days: row.get(5)?,
        cost: row.get(6)?,
        status: row.get(7)?,
        created_ts: row.get(8)?,
        modified_ts: row.get(9)?,
        started_ts: row.get(10)?,
        completed_ts: row.get(11)?,
    })
}

impl InstanceRepo {
    /// Copy a template's stage graph into a project.
    ///
    /// Every stage definition becomes a `pending` project stage (in position
    /// order) and every template edge becomes an edge between the
    /// corresponding project stages. The project records which template it
    /// adopted.
    ///
    /// Fails without writing anything if the template is missing, inactive or
    /// empty, if its stored edges contain a cycle, if the project is missing
    /// or already has stages, or if any write fails.
    pub fn instantiate(
        conn: &Connection,
        template_id: TemplateId,
        project_id: ProjectId,
    ) -> Result<InstantiatedGraph, WorkflowError> {
        let tx = write_tx(conn)?;

        let template = TemplateRepo::fetch(&tx, template_id)?
            .ok_or(WorkflowError::TemplateNotFound(template_id))?;
        if !template.is_active {
            return Err(WorkflowError::TemplateInactive(template_id));
        }
        if ProjectRepo::fetch(&tx, project_id)?.is_none() {
            return Err(WorkflowError::ProjectNotFound(project_id));
        }
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM project_stages WHERE project_id = ?1",
            [project_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(WorkflowError::AlreadyInstantiated { project_id });
        }

        let definitions = StageDefinitionRepo::load(&tx, template_id)?;
        if definitions.is_empty() {
            return Err(WorkflowError::TemplateEmpty { template_id });
        }
        let template_edges: Vec<(StageDefId, StageDefId)> = DependencyRepo::load(&tx, template_id)?
            .iter()
            .map(|d| d.as_edge())
            .collect();
        if let Some(cycle) = graph::find_cycle(definitions.iter().map(|d| d.id), &template_edges) {
            return Err(WorkflowError::CycleDetected {
                path: cycle.into_iter().map(StageDefId::get).collect(),
            });
        }

        let now = now_ts();
        let mut mapping: HashMap<StageDefId, StageInstanceId> = HashMap::with_capacity(definitions.len());
        let mut instances = Vec::with_capacity(definitions.len());
        for def in &definitions {
            tx.execute(
                "INSERT INTO project_stages (project_id, definition_id, name, position, duration_days,
                                             cost, status, created_ts, modified_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    project_id,
                    def.id,
                    def.name,
                    def.position,
                    def.duration_days,
                    def.cost,
                    StageStatus::Pending,
                    now,
                    now
                ],
            )?;
            let id = StageInstanceId(tx.last_insert_rowid());
            mapping.insert(def.id, id);
            instances.push(ProjectStageInstance {
                id,
                project_id,
                definition_id: Some(def.id),
                name: def.name.clone(),
                position: def.position,
                duration_days: def.duration_days,
                cost: def.cost,
                status: StageStatus::Pending,
                created_ts: now,
                modified_ts: now,
                started_ts: None,
                completed_ts: None,
            });
        }

        let mut edges = Vec::with_capacity(template_edges.len());
        for (from, to) in template_edges {
            // Both ends belong to the template, so both were just copied
            let edge = InstanceDependency {
                project_id,
                prerequisite_id: mapping[&from],
                dependent_id: mapping[&to],
            };
            tx.execute(
                "INSERT INTO project_stage_dependencies (project_id, prerequisite_id, dependent_id)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![project_id, edge.prerequisite_id, edge.dependent_id],
            )?;
            edges.push(edge);
        }

        tx.execute(
            "UPDATE projects SET template_id = ?1 WHERE id = ?2",
            rusqlite::params![template_id, project_id],
        )?;
        tx.commit()?;

        log::info!(
            "Applied template {} '{}' to project {}: {} stages, {} dependencies",
            template_id,
            template.name,
            project_id,
            instances.len(),
            edges.len()
        );
        Ok(InstantiatedGraph {
            project_id,
            instances,
            edges,
            mapping,
        })
    }

    /// Get a project stage by ID
    pub fn get(conn: &Connection, id: StageInstanceId) -> Result<Option<ProjectStageInstance>, WorkflowError> {
        let stage = conn
            .query_row(
                &format!("SELECT {} FROM project_stages WHERE id = ?1", INSTANCE_COLUMNS),
                [id],
                row_to_instance,
            )
            .optional()?;
        Ok(stage)
    }

    /// List a project's stages in workflow order
    pub fn list_for_project(conn: &Connection, project_id: ProjectId) -> Result<Vec<ProjectStageInstance>, WorkflowError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM project_stages WHERE project_id = ?1 ORDER BY position, id",
            INSTANCE_COLUMNS
        ))?;
        let rows = stmt.query_map([project_id], row_to_instance)?;

        let mut stages = Vec::new();
        for row in rows {
            stages.push(row?);
        }
        Ok(stages)
    }

    /// List a project's stage edges
    pub fn edges_for_project(conn: &Connection, project_id: ProjectId) -> Result<Vec<InstanceDependency>, WorkflowError> {
        let mut stmt = conn.prepare(
            "SELECT project_id, prerequisite_id, dependent_id
             FROM project_stage_dependencies WHERE project_id = ?1
             ORDER BY prerequisite_id, dependent_id",
        )?;
        let rows = stmt.query_map([project_id], |row| {
            Ok(InstanceDependency {
                project_id: row.get(0)?,
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

    /// Stages and edges of a project read from one snapshot
    pub fn snapshot(
        conn: &Connection,
        project_id: ProjectId,
    ) -> Result<(Vec<ProjectStageInstance>, Vec<InstanceDependency>), WorkflowError> {
        let tx = conn.unchecked_transaction()?;
        if ProjectRepo::fetch(&tx, project_id)?.is_none() {
            return Err(WorkflowError::ProjectNotFound(project_id));
        }
        let stages = Self::list_for_project(&tx, project_id)?;
        let edges = Self::edges_for_project(&tx, project_id)?;
        tx.commit()?;
        Ok((stages, edges))
    }

    /// Gate state of every stage of a project, in workflow order
    pub fn board(conn: &Connection, project_id: ProjectId) -> Result<Vec<StageGate>, WorkflowError> {
        let (stages, edges) = Self::snapshot(conn, project_id)?;
        Ok(gating::evaluate(&stages, &edges))
    }

    /// Stages that may be started now: pending, with every prerequisite completed
    pub fn eligible_stages(conn: &Connection, project_id: ProjectId) -> Result<BTreeSet<StageInstanceId>, WorkflowError> {
        let (stages, edges) = Self::snapshot(conn, project_id)?;
        Ok(gating::eligible(&stages, &edges))
    }

    /// Pending stages still waiting, each with the prerequisites it waits on
    pub fn blocked_stages(
        conn: &Connection,
        project_id: ProjectId,
    ) -> Result<Vec<(ProjectStageInstance, Vec<StageInstanceId>)>, WorkflowError> {
        Ok(Self::board(conn, project_id)?
            .into_iter()
            .filter_map(|g| match g.gate {
                GateState::Blocked { waiting_on } => Some((g.stage, waiting_on)),
                _ => None,
            })
            .collect())
    }

    /// Start a stage: `pending -> in_progress`, only once every prerequisite is completed
    pub fn start(conn: &Connection, id: StageInstanceId) -> Result<ProjectStageInstance, WorkflowError> {
        let tx = write_tx(conn)?;
        let stage = Self::get(&tx, id)?.ok_or(WorkflowError::StageNotFound(id.get()))?;
        Self::check_transition(&stage, StageStatus::InProgress)?;

        let stages = Self::list_for_project(&tx, stage.project_id)?;
        let edges = Self::edges_for_project(&tx, stage.project_id)?;
        let graph = DependencyGraph::from_edges(edges.iter().map(InstanceDependency::as_edge));
        let statuses: HashMap<StageInstanceId, StageStatus> =
            stages.iter().map(|s| (s.id, s.status)).collect();
        if let GateState::Blocked { waiting_on } = gating::gate_for(&stage, &graph, &statuses) {
            return Err(WorkflowError::Blocked { stage_id: id, waiting_on });
        }

        let now = now_ts();
        tx.execute(
            "UPDATE project_stages SET status = ?1, started_ts = ?2, modified_ts = ?2 WHERE id = ?3",
            rusqlite::params![StageStatus::InProgress, now, id],
        )?;
        tx.commit()?;

        log::info!("Started stage {} '{}' of project {}", id, stage.name, stage.project_id);
        Ok(ProjectStageInstance {
            status: StageStatus::InProgress,
            started_ts: Some(now),
            modified_ts: now,
            ..stage
        })
    }

    /// Complete a stage: `in_progress -> completed`
    pub fn complete(conn: &Connection, id: StageInstanceId) -> Result<ProjectStageInstance, WorkflowError> {
        let tx = write_tx(conn)?;
        let stage = Self::get(&tx, id)?.ok_or(WorkflowError::StageNotFound(id.get()))?;
        Self::check_transition(&stage, StageStatus::Completed)?;

        let now = now_ts();
        tx.execute(
            "UPDATE project_stages SET status = ?1, completed_ts = ?2, modified_ts = ?2 WHERE id = ?3",
            rusqlite::params![StageStatus::Completed, now, id],
        )?;
        tx.commit()?;

        log::info!("Completed stage {} '{}' of project {}", id, stage.name, stage.project_id);
        Ok(ProjectStageInstance {
            status: StageStatus::Completed,
            completed_ts: Some(now),
            modified_ts: now,
            ..stage
        })
    }

    fn check_transition(stage: &ProjectStageInstance, to: StageStatus) -> Result<(), WorkflowError> {
        if stage.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                stage_id: stage.id,
                from: stage.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConnection;
    use crate::models::NewStage;

    struct Fixture {
        conn: Connection,
        template: TemplateId,
        stages: Vec<StageDefId>,
        project: ProjectId,
    }

    /// Template with the given stages and edges (by index), plus one empty project
    fn fixture(names: &[&str], edges: &[(usize, usize)]) -> Fixture {
        let conn = DbConnection::connect_in_memory().unwrap();
        let template = TemplateRepo::create(&conn, "kitchen").unwrap().id;
        let stages: Vec<StageDefId> = names
            .iter()
            .map(|n| StageDefinitionRepo::create(&conn, template, &NewStage::named(*n)).unwrap().id)
            .collect();
        for &(a, b) in edges {
            DependencyRepo::add(&conn, template, stages[a], stages[b]).unwrap();
        }
        let project = ProjectRepo::create(&conn, "smith-kitchen").unwrap().id;
        Fixture { conn, template, stages, project }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_instantiate_copies_nodes_and_edges() {
        let f = fixture(&["Measure", "Design", "Build", "Deliver"], &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let graph = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();

        assert_eq!(graph.instances.len(), 4);
        assert_eq!(graph.edges.len(), 4);
        assert!(graph.instances.iter().all(|s| s.status == StageStatus::Pending));

        // Bijective mapping
        assert_eq!(graph.mapping.len(), 4);
        let targets: BTreeSet<StageInstanceId> = graph.mapping.values().copied().collect();
        assert_eq!(targets.len(), 4);
        for def in &f.stages {
            let inst = graph.mapping[def];
            let copied = graph.instances.iter().find(|s| s.id == inst).unwrap();
            assert_eq!(copied.definition_id, Some(*def));
        }

        // Edges mirror the template
        let expected: BTreeSet<(StageInstanceId, StageInstanceId)> = [(0, 1), (0, 2), (1, 3), (2, 3)]
            .iter()
            .map(|&(a, b)| (graph.mapping[&f.stages[a]], graph.mapping[&f.stages[b]]))
            .collect();
        let stored: BTreeSet<(StageInstanceId, StageInstanceId)> =
            InstanceRepo::edges_for_project(&f.conn, f.project)
                .unwrap()
                .iter()
                .map(InstanceDependency::as_edge)
                .collect();
        assert_eq!(stored, expected);

        let project = ProjectRepo::get_by_id(&f.conn, f.project).unwrap().unwrap();
        assert_eq!(project.template_id, Some(f.template));
    }

    #[test]
    fn test_instances_preserve_position_order() {
        let conn = DbConnection::connect_in_memory().unwrap();
        let t = TemplateRepo::create(&conn, "kitchen").unwrap().id;
        for (name, pos) in [("Deliver", 30), ("Measure", 10), ("Design", 20)] {
            let stage = NewStage { name: name.into(), position: Some(pos), ..Default::default() };
            StageDefinitionRepo::create(&conn, t, &stage).unwrap();
        }
        let p = ProjectRepo::create(&conn, "p").unwrap().id;

        let graph = InstanceRepo::instantiate(&conn, t, p).unwrap();
        let names: Vec<&str> = graph.instances.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Measure", "Design", "Deliver"]);

        let listed = InstanceRepo::list_for_project(&conn, p).unwrap();
        assert_eq!(listed, graph.instances);
    }

    #[test]
    fn test_empty_template_rejected() {
        let f = fixture(&[], &[]);
        let err = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap_err();
        assert!(matches!(err, WorkflowError::TemplateEmpty { .. }));
        assert_eq!(count(&f.conn, "project_stages"), 0);
    }

    #[test]
    fn test_inactive_template_rejected() {
        let f = fixture(&["Measure"], &[]);
        TemplateRepo::set_active(&f.conn, f.template, false).unwrap();
        let err = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap_err();
        assert!(matches!(err, WorkflowError::TemplateInactive(_)));
    }

    #[test]
    fn test_missing_template_or_project() {
        let f = fixture(&["Measure"], &[]);
        let err = InstanceRepo::instantiate(&f.conn, TemplateId(999), f.project).unwrap_err();
        assert!(matches!(err, WorkflowError::TemplateNotFound(_)));
        let err = InstanceRepo::instantiate(&f.conn, f.template, ProjectId(999)).unwrap_err();
        assert!(matches!(err, WorkflowError::ProjectNotFound(_)));
    }

    #[test]
    fn test_second_instantiation_rejected() {
        let f = fixture(&["Measure", "Design"], &[(0, 1)]);
        InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();
        let err = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyInstantiated { .. }));
        assert_eq!(count(&f.conn, "project_stages"), 2);
    }

    #[test]
    fn test_stored_cycle_blocks_instantiation() {
        let f = fixture(&["A", "B"], &[(0, 1)]);
        f.conn
            .execute(
                "INSERT INTO stage_dependencies (template_id, prerequisite_id, dependent_id, created_ts)
                 VALUES (?1, ?2, ?3, 0)",
                rusqlite::params![f.template, f.stages[1], f.stages[0]],
            )
            .unwrap();

        let err = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected { .. }));
        assert_eq!(count(&f.conn, "project_stages"), 0);
    }

    #[test]
    fn test_template_edits_do_not_reach_instances() {
        let f = fixture(&["Measure", "Design"], &[(0, 1)]);
        let graph = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();

        StageDefinitionRepo::delete(&f.conn, f.stages[0]).unwrap();
        TemplateRepo::rename(&f.conn, f.template, "kitchen-v2").unwrap();

        let stages = InstanceRepo::list_for_project(&f.conn, f.project).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, "Measure");
        assert_eq!(stages[0].definition_id, None);
        assert_eq!(InstanceRepo::edges_for_project(&f.conn, f.project).unwrap(), graph.edges);
    }

    #[test]
    fn test_roots_eligible_after_instantiation() {
        let f = fixture(&["Measure", "Survey", "Design"], &[(0, 2)]);
        let graph = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();

        let eligible = InstanceRepo::eligible_stages(&f.conn, f.project).unwrap();
        let expected: BTreeSet<StageInstanceId> =
            [graph.mapping[&f.stages[0]], graph.mapping[&f.stages[1]]].into_iter().collect();
        assert_eq!(eligible, expected);

        let blocked = InstanceRepo::blocked_stages(&f.conn, f.project).unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0.name, "Design");
        assert_eq!(blocked[0].1, vec![graph.mapping[&f.stages[0]]]);
    }

    #[test]
    fn test_start_requires_completed_prerequisites() {
        let f = fixture(&["Measure", "Design"], &[(0, 1)]);
        let graph = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();
        let (measure, design) = (graph.mapping[&f.stages[0]], graph.mapping[&f.stages[1]]);

        let err = InstanceRepo::start(&f.conn, design).unwrap_err();
        assert!(matches!(err, WorkflowError::Blocked { ref waiting_on, .. } if waiting_on == &vec![measure]));

        // In progress is not enough
        InstanceRepo::start(&f.conn, measure).unwrap();
        assert!(matches!(
            InstanceRepo::start(&f.conn, design).unwrap_err(),
            WorkflowError::Blocked { .. }
        ));

        InstanceRepo::complete(&f.conn, measure).unwrap();
        let started = InstanceRepo::start(&f.conn, design).unwrap();
        assert_eq!(started.status, StageStatus::InProgress);
        assert!(started.started_ts.is_some());
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let f = fixture(&["Measure"], &[]);
        let graph = InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();
        let id = graph.instances[0].id;

        // Cannot skip in_progress
        let err = InstanceRepo::complete(&f.conn, id).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition { from: StageStatus::Pending, to: StageStatus::Completed, .. }
        ));

        InstanceRepo::start(&f.conn, id).unwrap();
        assert!(matches!(
            InstanceRepo::start(&f.conn, id).unwrap_err(),
            WorkflowError::InvalidTransition { .. }
        ));

        let done = InstanceRepo::complete(&f.conn, id).unwrap();
        assert_eq!(done.status, StageStatus::Completed);
        assert!(done.completed_ts.is_some());

        // Nothing leaves completed
        assert!(InstanceRepo::start(&f.conn, id).is_err());
        assert!(InstanceRepo::complete(&f.conn, id).is_err());
        let stored = InstanceRepo::get(&f.conn, id).unwrap().unwrap();
        assert_eq!(stored.status, StageStatus::Completed);
    }

    #[test]
    fn test_unknown_stage_and_project() {
        let conn = DbConnection::connect_in_memory().unwrap();
        assert!(matches!(
            InstanceRepo::start(&conn, StageInstanceId(5)).unwrap_err(),
            WorkflowError::StageNotFound(5)
        ));
        assert!(matches!(
            InstanceRepo::eligible_stages(&conn, ProjectId(5)).unwrap_err(),
            WorkflowError::ProjectNotFound(_)
        ));
    }

    #[test]
    fn test_project_delete_removes_stage_graph() {
        let f = fixture(&["Measure", "Design"], &[(0, 1)]);
        InstanceRepo::instantiate(&f.conn, f.template, f.project).unwrap();

        ProjectRepo::delete(&f.conn, f.project).unwrap();
        assert_eq!(count(&f.conn, "project_stages"), 0);
        assert_eq!(count(&f.conn, "project_stage_dependencies"), 0);
    }
}
