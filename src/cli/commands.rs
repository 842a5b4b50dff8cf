use clap::{Parser, Subcommand};
use rusqlite::Connection;
use crate::config::Config;
use crate::db::DbConnection;
use crate::error::WorkflowError;
use crate::graph::gating;
use crate::models::{
    GateState, NewStage, ProcessTemplate, Project, ProjectId, StageDefId, StageGate,
    StageInstanceId, StageUpdate, TemplateDocument, TemplateId,
};
use crate::repo::{DependencyRepo, InstanceRepo, ProjectRepo, StageDefinitionRepo, TemplateRepo};
use crate::cli::output::{
    format_board, format_dependency_list, format_eligible, format_instantiation,
    format_project_list, format_stage_list, format_template_detail, format_template_list, is_tty,
};
use crate::cli::error::{user_error, validate_id, validate_name, validate_non_negative};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use anyhow::{Context, Result};

#[derive(Parser)]
#[command(name = "procflow")]
#[command(about = "Process templates and dependency-gated stage workflows")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process template management
    Templates {
        #[command(subcommand)]
        subcommand: TemplateCommands,
    },
    /// Stage definitions of a template
    Stages {
        #[command(subcommand)]
        subcommand: StageCommands,
    },
    /// Dependencies between stages of a template
    Deps {
        #[command(subcommand)]
        subcommand: DepCommands,
    },
    /// Project management
    Projects {
        #[command(subcommand)]
        subcommand: ProjectCommands,
    },
    /// Copy a template's stages and dependencies into a project
    Apply {
        /// Template ID or name
        template: String,
        /// Project ID or name
        project: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show every stage of a project with its gate state
    Board {
        /// Project ID or name
        project: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// List the stages of a project that may start now
    Eligible {
        /// Project ID or name
        project: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Start a project stage (all prerequisites must be completed)
    Start {
        /// Project stage ID
        stage: String,
    },
    /// Complete a started project stage
    Complete {
        /// Project stage ID
        stage: String,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Create a template
    Add {
        /// Template name
        name: String,
    },
    /// List templates
    List {
        /// Include inactive templates
        #[arg(long)]
        all: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show a template with its stages and dependencies
    Show {
        /// Template ID or name
        template: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Rename a template
    Rename {
        /// Template ID or name
        template: String,
        /// New name
        new_name: String,
    },
    /// Allow a template to be applied to projects
    Activate {
        /// Template ID or name
        template: String,
    },
    /// Stop a template from being applied to projects
    Deactivate {
        /// Template ID or name
        template: String,
    },
    /// Delete a template with its stages and dependencies
    Delete {
        /// Template ID or name
        template: String,
        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Write a template as a JSON document
    Export {
        /// Template ID or name
        template: String,
        /// Output file (defaults to stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Create a template from a JSON document
    Import {
        /// Document file
        file: PathBuf,
        /// Override the template name from the document
        #[arg(long)]
        name: Option<String>,
    },
    /// Verify that a template's stored dependencies are acyclic
    Check {
        /// Template ID or name
        template: String,
    },
}

#[derive(Subcommand)]
pub enum StageCommands {
    /// Add a stage to a template
    Add {
        /// Template ID or name
        template: String,
        /// Stage name
        name: String,
        /// Display position (defaults to after the last stage)
        #[arg(long)]
        position: Option<i64>,
        /// Planned duration in days
        #[arg(long)]
        duration: Option<i64>,
        /// Planned cost
        #[arg(long)]
        cost: Option<f64>,
    },
    /// List a template's stages
    List {
        /// Template ID or name
        template: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Modify a stage definition
    Modify {
        /// Stage ID
        stage: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        position: Option<i64>,
        #[arg(long, conflicts_with = "clear_duration")]
        duration: Option<i64>,
        #[arg(long, conflicts_with = "clear_cost")]
        cost: Option<f64>,
        /// Remove the planned duration
        #[arg(long)]
        clear_duration: bool,
        /// Remove the planned cost
        #[arg(long)]
        clear_cost: bool,
    },
    /// Delete a stage definition and its dependencies
    Delete {
        /// Stage ID
        stage: String,
    },
}

#[derive(Subcommand)]
pub enum DepCommands {
    /// Require FROM to complete before TO may start
    Add {
        /// Template ID or name
        template: String,
        /// Prerequisite stage (ID or name)
        from: String,
        /// Dependent stage (ID or name)
        to: String,
    },
    /// Remove a dependency
    Remove {
        /// Template ID or name
        template: String,
        /// Prerequisite stage (ID or name)
        from: String,
        /// Dependent stage (ID or name)
        to: String,
    },
    /// List a template's dependencies
    List {
        /// Template ID or name
        template: String,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a project
    Add {
        /// Project name
        name: String,
    },
    /// List projects
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Delete a project and its stages
    Delete {
        /// Project ID or name
        project: String,
        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    handle_command(cli)
}

/// Set up env_logger. `PROCFLOW_LOG` wins over `log.level` from the rc file.
pub fn init_logging() {
    let default_level = Config::load()
        .ok()
        .and_then(|c| c.log_level)
        .unwrap_or_else(|| "warn".to_string());
    let env = env_logger::Env::default().filter_or("PROCFLOW_LOG", default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

fn handle_command(cli: Cli) -> Result<()> {
    let conn = DbConnection::connect()
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Templates { subcommand } => handle_templates(&conn, subcommand),
        Commands::Stages { subcommand } => handle_stages(&conn, subcommand),
        Commands::Deps { subcommand } => handle_deps(&conn, subcommand),
        Commands::Projects { subcommand } => handle_projects(&conn, subcommand),
        Commands::Apply { template, project, json } => handle_apply(&conn, &template, &project, json),
        Commands::Board { project, json } => handle_board(&conn, &project, json),
        Commands::Eligible { project, json } => handle_eligible(&conn, &project, json),
        Commands::Start { stage } => handle_start(&conn, &stage),
        Commands::Complete { stage } => handle_complete(&conn, &stage),
    }
}

/// Ask for confirmation on stderr. Anything but y/yes declines.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N]: ", prompt);
    std::io::Write::flush(&mut std::io::stderr())
        .map_err(|e| anyhow::anyhow!("Failed to flush stderr: {}", e))?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)
        .map_err(|e| anyhow::anyhow!("Failed to read input: {}", e))?;

    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Resolve a template argument: a numeric ID or an exact name
fn resolve_template(conn: &Connection, arg: &str) -> Result<ProcessTemplate> {
    if arg.chars().all(|c| c.is_ascii_digit()) {
        let id = TemplateId(validate_id(arg, "template").unwrap_or_else(|e| user_error(&e)));
        return TemplateRepo::get_by_id(conn, id)?
            .ok_or_else(|| WorkflowError::TemplateNotFound(id).into());
    }
    match TemplateRepo::get_by_name(conn, arg)? {
        Some(template) => Ok(template),
        None => user_error(&format!("Template '{}' not found", arg)),
    }
}

/// Resolve a project argument: a numeric ID or an exact name
fn resolve_project(conn: &Connection, arg: &str) -> Result<Project> {
    if arg.chars().all(|c| c.is_ascii_digit()) {
        let id = ProjectId(validate_id(arg, "project").unwrap_or_else(|e| user_error(&e)));
        return ProjectRepo::get_by_id(conn, id)?
            .ok_or_else(|| WorkflowError::ProjectNotFound(id).into());
    }
    match ProjectRepo::get_by_name(conn, arg)? {
        Some(project) => Ok(project),
        None => user_error(&format!("Project '{}' not found. To add: procflow projects add {}", arg, arg)),
    }
}

/// Resolve a stage of `template`: a numeric ID (checked later by the
/// dependency validator) or a stage name unique within the template
fn resolve_stage(conn: &Connection, template: &ProcessTemplate, arg: &str) -> Result<StageDefId> {
    if arg.chars().all(|c| c.is_ascii_digit()) {
        return Ok(StageDefId(validate_id(arg, "stage").unwrap_or_else(|e| user_error(&e))));
    }
    let matches: Vec<StageDefId> = StageDefinitionRepo::list_for_template(conn, template.id)?
        .into_iter()
        .filter(|s| s.name == arg)
        .map(|s| s.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => user_error(&format!("Stage '{}' not found in template '{}'", arg, template.name)),
        _ => user_error(&format!(
            "Stage name '{}' is ambiguous in template '{}'. Use a stage ID.",
            arg, template.name
        )),
    }
}

fn handle_templates(conn: &Connection, cmd: TemplateCommands) -> Result<()> {
    match cmd {
        TemplateCommands::Add { name } => {
            if let Err(e) = validate_name(&name, "template") {
                user_error(&e);
            }
            if TemplateRepo::get_by_name(conn, &name)?.is_some() {
                user_error(&format!("Template '{}' already exists", name));
            }

            let template = TemplateRepo::create(conn, &name)?;
            println!("Created template '{}' (id: {})", template.name, template.id);
            Ok(())
        }
        TemplateCommands::List { all, json } => {
            let templates = TemplateRepo::list(conn, all)
                .context("Failed to list templates")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
            } else {
                let mut counts = HashMap::new();
                for template in &templates {
                    let stages = StageDefinitionRepo::list_for_template(conn, template.id)?;
                    counts.insert(template.id.get(), stages.len());
                }
                println!("{}", format_template_list(&templates, &counts, is_tty()));
            }
            Ok(())
        }
        TemplateCommands::Show { template, json } => {
            let template = resolve_template(conn, &template)?;
            let stages = StageDefinitionRepo::list_for_template(conn, template.id)?;
            let edges = DependencyRepo::list_for_template(conn, template.id)?;

            if json {
                let value = serde_json::json!({
                    "template": template,
                    "stages": stages,
                    "dependencies": edges,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", format_template_detail(&template, &stages, &edges, is_tty()));
            }
            Ok(())
        }
        TemplateCommands::Rename { template, new_name } => {
            if let Err(e) = validate_name(&new_name, "template") {
                user_error(&e);
            }
            let template = resolve_template(conn, &template)?;
            if TemplateRepo::get_by_name(conn, &new_name)?.is_some() {
                user_error(&format!("Template '{}' already exists", new_name));
            }

            TemplateRepo::rename(conn, template.id, &new_name)?;
            println!("Renamed template '{}' to '{}'", template.name, new_name);
            Ok(())
        }
        TemplateCommands::Activate { template } => {
            let template = resolve_template(conn, &template)?;
            TemplateRepo::set_active(conn, template.id, true)?;
            println!("Activated template '{}'", template.name);
            Ok(())
        }
        TemplateCommands::Deactivate { template } => {
            let template = resolve_template(conn, &template)?;
            TemplateRepo::set_active(conn, template.id, false)?;
            println!("Deactivated template '{}'", template.name);
            Ok(())
        }
        TemplateCommands::Delete { template, yes } => {
            let template = resolve_template(conn, &template)?;
            if !yes && !confirm(&format!("Delete template '{}' with all its stages?", template.name))? {
                println!("Cancelled.");
                return Ok(());
            }

            TemplateRepo::delete(conn, template.id)?;
            println!("Deleted template '{}'", template.name);
            Ok(())
        }
        TemplateCommands::Export { template, output } => {
            let template = resolve_template(conn, &template)?;
            let doc = TemplateRepo::export(conn, template.id)?;
            let json = serde_json::to_string_pretty(&doc)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json + "\n")
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported template '{}' to {}", template.name, path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        TemplateCommands::Import { file, name } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut doc: TemplateDocument = match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(e) => user_error(&format!("Invalid template document {}: {}", file.display(), e)),
            };
            if let Some(name) = name {
                doc.name = name;
            }
            if let Err(e) = validate_name(&doc.name, "template") {
                user_error(&e);
            }
            for entry in &doc.stages {
                if let Err(e) = validate_name(&entry.name, "stage") {
                    user_error(&format!("Stage key {}: {}", entry.key, e));
                }
            }
            if TemplateRepo::get_by_name(conn, &doc.name)?.is_some() {
                user_error(&format!("Template '{}' already exists", doc.name));
            }

            let template = TemplateRepo::import(conn, &doc)?;
            println!(
                "Imported template '{}' (id: {}) with {} stages and {} dependencies",
                template.name,
                template.id,
                doc.stages.len(),
                doc.dependencies.len()
            );
            Ok(())
        }
        TemplateCommands::Check { template } => {
            let template = resolve_template(conn, &template)?;
            if let Some(cycle) = TemplateRepo::find_cycle(conn, template.id)? {
                return Err(WorkflowError::CycleDetected {
                    path: cycle.into_iter().map(StageDefId::get).collect(),
                }
                .into());
            }
            println!("Template '{}' has no dependency cycles", template.name);
            Ok(())
        }
    }
}

fn handle_stages(conn: &Connection, cmd: StageCommands) -> Result<()> {
    match cmd {
        StageCommands::Add { template, name, position, duration, cost } => {
            if let Err(e) = validate_name(&name, "stage") {
                user_error(&e);
            }
            if let Err(e) = validate_non_negative(duration, "Duration") {
                user_error(&e);
            }
            if let Err(e) = validate_non_negative(cost, "Cost") {
                user_error(&e);
            }
            let template = resolve_template(conn, &template)?;

            let stage = StageDefinitionRepo::create(
                conn,
                template.id,
                &NewStage { name, position, duration_days: duration, cost },
            )?;
            println!(
                "Added stage '{}' (id: {}) to template '{}' at position {}",
                stage.name, stage.id, template.name, stage.position
            );
            Ok(())
        }
        StageCommands::List { template, json } => {
            let template = resolve_template(conn, &template)?;
            let stages = StageDefinitionRepo::list_for_template(conn, template.id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stages)?);
            } else {
                let edges = DependencyRepo::list_for_template(conn, template.id)?;
                println!("{}", format_stage_list(&stages, &edges, is_tty()));
            }
            Ok(())
        }
        StageCommands::Modify { stage, name, position, duration, cost, clear_duration, clear_cost } => {
            let id = StageDefId(validate_id(&stage, "stage").unwrap_or_else(|e| user_error(&e)));
            if let Some(name) = &name {
                if let Err(e) = validate_name(name, "stage") {
                    user_error(&e);
                }
            }
            if let Err(e) = validate_non_negative(duration, "Duration") {
                user_error(&e);
            }
            if let Err(e) = validate_non_negative(cost, "Cost") {
                user_error(&e);
            }

            let update = StageUpdate {
                name,
                position,
                duration_days: if clear_duration { Some(None) } else { duration.map(Some) },
                cost: if clear_cost { Some(None) } else { cost.map(Some) },
            };
            if update.is_empty() {
                user_error("Nothing to modify. Use --name, --position, --duration or --cost.");
            }

            let stage = StageDefinitionRepo::update(conn, id, &update)?;
            println!("Modified stage {} '{}'", stage.id, stage.name);
            Ok(())
        }
        StageCommands::Delete { stage } => {
            let id = StageDefId(validate_id(&stage, "stage").unwrap_or_else(|e| user_error(&e)));
            StageDefinitionRepo::delete(conn, id)?;
            println!("Deleted stage {}", id);
            Ok(())
        }
    }
}

fn handle_deps(conn: &Connection, cmd: DepCommands) -> Result<()> {
    match cmd {
        DepCommands::Add { template, from, to } => {
            let template = resolve_template(conn, &template)?;
            let from = resolve_stage(conn, &template, &from)?;
            let to = resolve_stage(conn, &template, &to)?;

            if DependencyRepo::add(conn, template.id, from, to)? {
                println!("Stage {} now depends on stage {}", to, from);
            } else {
                println!("Stage {} already depends on stage {}", to, from);
            }
            Ok(())
        }
        DepCommands::Remove { template, from, to } => {
            let template = resolve_template(conn, &template)?;
            let from = resolve_stage(conn, &template, &from)?;
            let to = resolve_stage(conn, &template, &to)?;

            if DependencyRepo::remove(conn, template.id, from, to)? {
                println!("Removed dependency {} -> {}", from, to);
            } else {
                user_error(&format!("No dependency {} -> {} in template '{}'", from, to, template.name));
            }
            Ok(())
        }
        DepCommands::List { template, json } => {
            let template = resolve_template(conn, &template)?;
            let edges = DependencyRepo::list_for_template(conn, template.id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&edges)?);
            } else {
                let stages = StageDefinitionRepo::list_for_template(conn, template.id)?;
                println!("{}", format_dependency_list(&edges, &stages, is_tty()));
            }
            Ok(())
        }
    }
}

fn handle_projects(conn: &Connection, cmd: ProjectCommands) -> Result<()> {
    match cmd {
        ProjectCommands::Add { name } => {
            if let Err(e) = validate_name(&name, "project") {
                user_error(&e);
            }
            if ProjectRepo::get_by_name(conn, &name)?.is_some() {
                user_error(&format!("Project '{}' already exists", name));
            }

            let project = ProjectRepo::create(conn, &name)?;
            println!("Created project '{}' (id: {})", project.name, project.id);
            Ok(())
        }
        ProjectCommands::List { json } => {
            let projects = ProjectRepo::list(conn)
                .context("Failed to list projects")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else {
                let template_names: HashMap<i64, String> = TemplateRepo::list(conn, true)?
                    .into_iter()
                    .map(|t| (t.id.get(), t.name))
                    .collect();
                println!("{}", format_project_list(&projects, &template_names, is_tty()));
            }
            Ok(())
        }
        ProjectCommands::Delete { project, yes } => {
            let project = resolve_project(conn, &project)?;
            if !yes && !confirm(&format!("Delete project '{}' with all its stages?", project.name))? {
                println!("Cancelled.");
                return Ok(());
            }

            ProjectRepo::delete(conn, project.id)?;
            println!("Deleted project '{}'", project.name);
            Ok(())
        }
    }
}

fn handle_apply(conn: &Connection, template: &str, project: &str, json: bool) -> Result<()> {
    let template = resolve_template(conn, template)?;
    let project = resolve_project(conn, project)?;

    let graph = InstanceRepo::instantiate(conn, template.id, project.id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        println!("{}", format_instantiation(&graph, &template, &project));
    }
    Ok(())
}

fn handle_board(conn: &Connection, project: &str, json: bool) -> Result<()> {
    let project = resolve_project(conn, project)?;
    let board = InstanceRepo::board(conn, project.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&board)?);
    } else {
        println!("{}", format_board(&project, &board, is_tty()));
    }
    Ok(())
}

fn handle_eligible(conn: &Connection, project: &str, json: bool) -> Result<()> {
    let project = resolve_project(conn, project)?;
    let board = InstanceRepo::board(conn, project.id)?;
    let mut eligible = eligible_ids(&board);

    if json {
        eligible.sort();
        println!("{}", serde_json::to_string_pretty(&eligible)?);
    } else {
        println!("{}", format_eligible(&board, &eligible));
    }
    Ok(())
}

/// Ids of the eligible stages on a board, in board order
fn eligible_ids(board: &[StageGate]) -> Vec<StageInstanceId> {
    board
        .iter()
        .filter(|g| g.gate == GateState::Eligible)
        .map(|g| g.stage.id)
        .collect()
}

fn handle_start(conn: &Connection, stage: &str) -> Result<()> {
    let id = StageInstanceId(validate_id(stage, "stage").unwrap_or_else(|e| user_error(&e)));
    let stage = InstanceRepo::start(conn, id)?;
    println!("Started stage {} '{}'", stage.id, stage.name);
    Ok(())
}

fn handle_complete(conn: &Connection, stage: &str) -> Result<()> {
    let id = StageInstanceId(validate_id(stage, "stage").unwrap_or_else(|e| user_error(&e)));
    let stage = InstanceRepo::complete(conn, id)?;
    println!("Completed stage {} '{}'", stage.id, stage.name);

    // Report the direct dependents this completion unblocked
    let (stages, edges) = InstanceRepo::snapshot(conn, stage.project_id)?;
    let dependents: HashSet<StageInstanceId> = edges
        .iter()
        .filter(|e| e.prerequisite_id == stage.id)
        .map(|e| e.dependent_id)
        .collect();
    let board = gating::evaluate(&stages, &edges);
    let unblocked: Vec<StageInstanceId> = eligible_ids(&board)
        .into_iter()
        .filter(|id| dependents.contains(id))
        .collect();
    if !unblocked.is_empty() {
        println!("Now eligible:\n{}", format_eligible(&board, &unblocked));
    }
    Ok(())
}
