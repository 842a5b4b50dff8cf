// Output formatting utilities

use crate::models::{
    GateState, InstantiatedGraph, ProcessTemplate, Project, StageDefId, StageDefinition,
    StageDependency, StageGate, StageInstanceId,
};
use chrono::{Local, TimeZone};
use std::collections::HashMap;
use std::io::IsTerminal;

// ANSI escape codes for terminal formatting
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RESET: &str = "\x1b[0m";
const ANSI_FG_GREEN: &str = "\x1b[32m";
const ANSI_FG_YELLOW: &str = "\x1b[33m";
const ANSI_FG_CYAN: &str = "\x1b[36m";
const ANSI_FG_BRIGHT_BLACK: &str = "\x1b[90m";

/// Check if stdout is a terminal (TTY)
pub fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Apply bold formatting if in TTY mode
fn bold_if_tty(text: &str, is_tty: bool) -> String {
    if is_tty {
        format!("{}{}{}", ANSI_BOLD, text, ANSI_RESET)
    } else {
        text.to_string()
    }
}

/// Color for a gate label
fn gate_color(gate: &GateState) -> &'static str {
    match gate {
        GateState::Eligible => ANSI_FG_GREEN,
        GateState::Blocked { .. } => ANSI_FG_BRIGHT_BLACK,
        GateState::InProgress => ANSI_FG_YELLOW,
        GateState::Completed => ANSI_FG_CYAN,
    }
}

/// Format timestamp for display
pub fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

fn format_cost(cost: Option<f64>) -> String {
    cost.map(|c| format!("{:.2}", c)).unwrap_or_default()
}

fn format_days(days: Option<i64>) -> String {
    days.map(|d| format!("{}d", d)).unwrap_or_default()
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

/// Lay out rows as left-aligned columns under a header.
///
/// `colors` optionally wraps a whole row in an ANSI color (TTY only). Widths
/// are computed from the uncolored text.
fn render_table(headers: &[&str], rows: &[Vec<String>], colors: &[Option<&str>], is_tty: bool) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let pad = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(bold_if_tty(&pad(headers.iter().map(|h| h.to_string()).collect()), is_tty));
    out.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    for (idx, row) in rows.iter().enumerate() {
        let line = pad(row.clone());
        match colors.get(idx).copied().flatten() {
            Some(color) if is_tty => out.push(format!("{}{}{}", color, line, ANSI_RESET)),
            _ => out.push(line),
        }
    }
    out.join("\n")
}

/// Format template list
pub fn format_template_list(templates: &[ProcessTemplate], stage_counts: &HashMap<i64, usize>, is_tty: bool) -> String {
    if templates.is_empty() {
        return "No templates found.".to_string();
    }
    let rows: Vec<Vec<String>> = templates
        .iter()
        .map(|t| {
            vec![
                t.id.to_string(),
                t.name.clone(),
                if t.is_active { "active" } else { "inactive" }.to_string(),
                stage_counts.get(&t.id.get()).copied().unwrap_or(0).to_string(),
                format_timestamp(t.modified_ts),
            ]
        })
        .collect();
    render_table(&["ID", "Name", "Status", "Stages", "Modified"], &rows, &[], is_tty)
}

/// Format a template's stages with the prerequisites of each
pub fn format_stage_list(stages: &[StageDefinition], edges: &[StageDependency], is_tty: bool) -> String {
    if stages.is_empty() {
        return "No stages defined.".to_string();
    }
    let mut after: HashMap<StageDefId, Vec<StageDefId>> = HashMap::new();
    for edge in edges {
        after.entry(edge.dependent_id).or_default().push(edge.prerequisite_id);
    }

    let rows: Vec<Vec<String>> = stages
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.position.to_string(),
                s.name.clone(),
                format_days(s.duration_days),
                format_cost(s.cost),
                after.get(&s.id).map(|p| join_ids(p)).unwrap_or_default(),
            ]
        })
        .collect();
    render_table(&["ID", "Pos", "Stage", "Duration", "Cost", "After"], &rows, &[], is_tty)
}

/// Format a template summary: header line followed by its stage table
pub fn format_template_detail(
    template: &ProcessTemplate,
    stages: &[StageDefinition],
    edges: &[StageDependency],
    is_tty: bool,
) -> String {
    let status = if template.is_active { "active" } else { "inactive" };
    let header = format!(
        "Template {}: {} ({}, {} stages, {} dependencies)",
        template.id,
        bold_if_tty(&template.name, is_tty),
        status,
        stages.len(),
        edges.len()
    );
    format!("{}\n\n{}", header, format_stage_list(stages, edges, is_tty))
}

/// Format dependency edges using stage names where known
pub fn format_dependency_list(edges: &[StageDependency], stages: &[StageDefinition], is_tty: bool) -> String {
    if edges.is_empty() {
        return "No dependencies defined.".to_string();
    }
    let names: HashMap<StageDefId, &str> = stages.iter().map(|s| (s.id, s.name.as_str())).collect();
    let label = |id: StageDefId| match names.get(&id) {
        Some(name) => format!("{} ({})", name, id),
        None => format!("[{}]", id),
    };

    let rows: Vec<Vec<String>> = edges
        .iter()
        .map(|e| vec![label(e.prerequisite_id), label(e.dependent_id)])
        .collect();
    render_table(&["Prerequisite", "Dependent"], &rows, &[], is_tty)
}

/// Format project list
pub fn format_project_list(projects: &[Project], template_names: &HashMap<i64, String>, is_tty: bool) -> String {
    if projects.is_empty() {
        return "No projects found.".to_string();
    }
    let rows: Vec<Vec<String>> = projects
        .iter()
        .map(|p| {
            let template = match p.template_id {
                Some(id) => template_names
                    .get(&id.get())
                    .cloned()
                    .unwrap_or_else(|| format!("[{}]", id)),
                None => String::new(),
            };
            vec![p.id.to_string(), p.name.clone(), template, format_timestamp(p.created_ts)]
        })
        .collect();
    render_table(&["ID", "Name", "Template", "Created"], &rows, &[], is_tty)
}

/// Format a project's stage board: every stage with its gate state
pub fn format_board(project: &Project, board: &[StageGate], is_tty: bool) -> String {
    if board.is_empty() {
        return format!("Project '{}' has no stages. Apply a template first.", project.name);
    }
    let rows: Vec<Vec<String>> = board
        .iter()
        .map(|g| {
            let waiting = match &g.gate {
                GateState::Blocked { waiting_on } => join_ids(waiting_on),
                _ => String::new(),
            };
            vec![
                g.stage.id.to_string(),
                g.stage.position.to_string(),
                g.stage.name.clone(),
                g.gate.label().to_string(),
                waiting,
                format_days(g.stage.duration_days),
                format_cost(g.stage.cost),
            ]
        })
        .collect();
    let colors: Vec<Option<&str>> = board.iter().map(|g| Some(gate_color(&g.gate))).collect();

    let completed = board.iter().filter(|g| g.gate == GateState::Completed).count();
    let table = render_table(
        &["ID", "Pos", "Stage", "State", "Waiting on", "Duration", "Cost"],
        &rows,
        &colors,
        is_tty,
    );
    format!(
        "Project {}: {} ({}/{} stages completed)\n\n{}",
        project.id,
        bold_if_tty(&project.name, is_tty),
        completed,
        board.len(),
        table
    )
}

/// Format the list of stages that may start now
pub fn format_eligible(board: &[StageGate], eligible: &[StageInstanceId]) -> String {
    if eligible.is_empty() {
        return "No stages are eligible to start.".to_string();
    }
    board
        .iter()
        .filter(|g| eligible.contains(&g.stage.id))
        .map(|g| format!("{}  {}", g.stage.id, g.stage.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summary printed after a template is applied
pub fn format_instantiation(graph: &InstantiatedGraph, template: &ProcessTemplate, project: &Project) -> String {
    let mut lines = vec![format!(
        "Applied template '{}' to project '{}': {} stages, {} dependencies.",
        template.name,
        project.name,
        graph.instances.len(),
        graph.edges.len()
    )];
    for stage in &graph.instances {
        lines.push(format!("  {}  {}", stage.id, stage.name));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProjectId, ProjectStageInstance, StageStatus, TemplateId};

    fn def(id: i64, name: &str, position: i64) -> StageDefinition {
        StageDefinition {
            id: StageDefId(id),
            template_id: TemplateId(1),
            name: name.to_string(),
            position,
            duration_days: None,
            cost: None,
            created_ts: 0,
        }
    }

    fn gate(id: i64, name: &str, gate: GateState) -> StageGate {
        StageGate {
            stage: ProjectStageInstance {
                id: StageInstanceId(id),
                project_id: ProjectId(1),
                definition_id: None,
                name: name.to_string(),
                position: id,
                duration_days: Some(2),
                cost: Some(150.0),
                status: StageStatus::Pending,
                created_ts: 0,
                modified_ts: 0,
                started_ts: None,
                completed_ts: None,
            },
            gate,
        }
    }

    #[test]
    fn test_render_table_aligns_columns() {
        let rows = vec![
            vec!["1".to_string(), "Measure".to_string()],
            vec!["10".to_string(), "Design".to_string()],
        ];
        let out = render_table(&["ID", "Stage"], &rows, &[], false);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ID  Stage");
        assert_eq!(lines[1], "--  -------");
        assert_eq!(lines[2], "1   Measure");
        assert_eq!(lines[3], "10  Design");
    }

    #[test]
    fn test_no_ansi_without_tty() {
        let board = vec![gate(1, "Measure", GateState::Eligible)];
        let project = Project { id: ProjectId(1), name: "p".into(), template_id: None, created_ts: 0 };
        let out = format_board(&project, &board, false);
        assert!(!out.contains('\x1b'));
        assert!(out.contains("eligible"));
        assert!(out.contains("0/1 stages completed"));
    }

    #[test]
    fn test_board_shows_waiting_on() {
        let board = vec![
            gate(1, "Measure", GateState::InProgress),
            gate(2, "Design", GateState::Blocked { waiting_on: vec![StageInstanceId(1)] }),
        ];
        let project = Project { id: ProjectId(1), name: "p".into(), template_id: None, created_ts: 0 };
        let out = format_board(&project, &board, false);
        let design_line = out.lines().find(|l| l.contains("Design")).unwrap();
        assert!(design_line.contains("blocked"));
        assert!(design_line.contains("2d"));
        assert!(design_line.contains("150.00"));
    }

    #[test]
    fn test_stage_list_shows_prerequisites() {
        let stages = vec![def(1, "Measure", 1), def(2, "Design", 2)];
        let edges = vec![StageDependency {
            template_id: TemplateId(1),
            prerequisite_id: StageDefId(1),
            dependent_id: StageDefId(2),
        }];
        let out = format_stage_list(&stages, &edges, false);
        let design_line = out.lines().find(|l| l.contains("Design")).unwrap();
        assert!(design_line.trim_end().ends_with('1'));
    }

    #[test]
    fn test_dependency_list_uses_names() {
        let stages = vec![def(1, "Measure", 1), def(2, "Design", 2)];
        let edges = vec![StageDependency {
            template_id: TemplateId(1),
            prerequisite_id: StageDefId(1),
            dependent_id: StageDefId(2),
        }];
        let out = format_dependency_list(&edges, &stages, false);
        assert!(out.contains("Measure (1)"));
        assert!(out.contains("Design (2)"));
    }

    #[test]
    fn test_eligible_listing() {
        let board = vec![
            gate(1, "Measure", GateState::Eligible),
            gate(2, "Design", GateState::Blocked { waiting_on: vec![StageInstanceId(1)] }),
        ];
        assert_eq!(format_eligible(&board, &[StageInstanceId(1)]), "1  Measure");
        assert_eq!(format_eligible(&board, &[]), "No stages are eligible to start.");
    }
}
