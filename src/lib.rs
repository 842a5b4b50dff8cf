//! Procflow - process templates and dependency-gated stage workflows
//!
//! This library provides the core functionality for Procflow, including:
//! - Database operations and migrations
//! - Data models for templates, stage definitions, projects and project stages
//! - Dependency graph validation (self-loops, foreign stages, cycles)
//! - Template instantiation into per-project stage graphs
//! - Gating: which project stages may start, and what blocks the rest
//! - CLI command parsing and execution
//!
//! # Example
//!
//! ```no_run
//! use procflow::db::DbConnection;
//! use procflow::models::NewStage;
//! use procflow::repo::{DependencyRepo, InstanceRepo, ProjectRepo, StageDefinitionRepo, TemplateRepo};
//!
//! let conn = DbConnection::connect().unwrap();
//! let template = TemplateRepo::create(&conn, "kitchen").unwrap();
//! let measure = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("Measure")).unwrap();
//! let design = StageDefinitionRepo::create(&conn, template.id, &NewStage::named("Design")).unwrap();
//! DependencyRepo::add(&conn, template.id, measure.id, design.id).unwrap();
//!
//! let project = ProjectRepo::create(&conn, "smith-kitchen").unwrap();
//! InstanceRepo::instantiate(&conn, template.id, project.id).unwrap();
//! let ready = InstanceRepo::eligible_stages(&conn, project.id).unwrap();
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod repo;
pub mod cli;
