//! # Unit of Work Demo
//!
//! Runs two units of work against the in-memory store and prints what each
//! flush sent.
//!
//! ## Usage
//! ```bash
//! # 12 tasks (default)
//! cargo run -p keel-db --bin keel-demo
//!
//! # Custom amount, bounded fan-out, verbose logs
//! KEEL_MAX_IN_FLIGHT=4 RUST_LOG=debug cargo run -p keel-db --bin keel-demo -- --count 100
//!
//! # Explicit config file
//! cargo run -p keel-db --bin keel-demo -- --config ./keel.toml
//! ```
//!
//! ## What Happens
//! 1. A project and N tasks are created in one flush.
//! 2. A second flush completes every other task, archives every third one
//!    (soft delete), drops the audit entry (hard delete, its pending sync is
//!    discarded) and runs a `recount` procedure.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keel_core::{
    shared, Capabilities, CoreResult, Entity, EntityLink, EntitySync, Model, ModelHandle,
    ModelId, Procedure, Shared, Snapshot,
};
use keel_db::{EntityManager, FlushReport, ManagerConfig, MemoryStore};

// =============================================================================
// Demo Models
// =============================================================================

#[derive(Debug, Clone, Serialize)]
struct ProjectRow {
    id: i64,
    name: String,
    open_tasks: i64,
    updated_at: Option<String>,
}

impl Model for ProjectRow {
    fn id(&self) -> ModelId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EDITABLE
    }

    fn snapshot(&self) -> CoreResult<Snapshot> {
        Snapshot::capture(self)
    }
}

#[derive(Debug, Clone, Serialize)]
struct TaskRow {
    id: i64,
    project_id: i64,
    title: String,
    done: bool,
    hidden: bool,
    updated_at: Option<String>,
}

impl Model for TaskRow {
    fn id(&self) -> ModelId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn snapshot(&self) -> CoreResult<Snapshot> {
        Snapshot::capture(self)
    }
}

#[derive(Debug, Clone, Serialize)]
struct AuditRow {
    id: i64,
    message: String,
}

impl Model for AuditRow {
    fn id(&self) -> ModelId {
        self.id
    }

    fn snapshot(&self) -> CoreResult<Snapshot> {
        Snapshot::capture(self)
    }
}

#[derive(Debug)]
struct Recount;

impl Procedure for Recount {
    fn name(&self) -> &str {
        "recount"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn print_report(title: &str, report: &FlushReport) {
    println!("{}", title);
    println!("  inserted:     {}", report.inserted);
    println!("  updated:      {}", report.updated);
    println!("  synced:       {}", report.synced);
    println!("  sync clean:   {}", report.sync_clean);
    println!("  sync skipped: {}", report.sync_skipped);
    println!("  hidden:       {}", report.hidden);
    println!("  destroyed:    {}", report.destroyed);
    println!("  procedures:   {}", report.procedures);
    println!("  elapsed:      {:?}", report.elapsed);
    println!();
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=keel=trace` - Show trace for keel crates only
/// - Default: INFO, DEBUG for keel crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keel=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 12;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(12);
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Keel Unit of Work Demo");
                println!();
                println!("Usage: keel-demo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>      Number of tasks to create (default: 12)");
                println!("      --config <PATH>  Manager config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    init_tracing();

    let config = ManagerConfig::load_or_default(config_path);
    info!(max_in_flight = config.fan_out(), tasks = count, "Starting demo");

    let store = Arc::new(MemoryStore::new());

    // -------------------------------------------------------------------------
    // Unit 1: create the project, its tasks and an audit entry
    // -------------------------------------------------------------------------

    let project_entity = Entity::new();
    let project = shared(ProjectRow {
        id: 1,
        name: "Launch".to_string(),
        open_tasks: count as i64,
        updated_at: None,
    });

    let tasks: Vec<(Entity, Shared<TaskRow>)> = (0..count)
        .map(|n| {
            let row = shared(TaskRow {
                id: n as i64 + 1,
                project_id: 1,
                title: format!("Task #{}", n + 1),
                done: false,
                hidden: false,
                updated_at: None,
            });
            (Entity::new(), row)
        })
        .collect();

    let audit_entity = Entity::new();
    let audit = shared(AuditRow {
        id: 1,
        message: "project created".to_string(),
    });

    let mut manager = EntityManager::with_config(store.clone(), config.clone());

    let project_model = project.clone();
    manager.persist(EntityLink::from_fn(project_entity, move |_| {
        Ok(ModelHandle::from_shared(project_model.clone()))
    }));

    for (entity, row) in &tasks {
        let row = row.clone();
        manager.persist(EntityLink::from_fn(*entity, move |_| {
            Ok(ModelHandle::from_shared(row.clone()))
        }));
    }

    let audit_model = audit.clone();
    manager.persist(EntityLink::from_fn(audit_entity, move |_| {
        Ok(ModelHandle::from_shared(audit_model.clone()))
    }));

    let report = manager.flush_in(store.as_ref()).await?;
    print_report("Unit 1: create", &report);

    // -------------------------------------------------------------------------
    // Unit 2: complete, archive, delete
    // -------------------------------------------------------------------------

    let mut manager = EntityManager::with_config(store.clone(), config);
    let mut completed = 0i64;

    for (n, (entity, row)) in tasks.iter().enumerate() {
        if n % 3 == 2 {
            manager.relation(entity, row.clone());
            manager.destroy(entity);
        } else if n % 2 == 0 {
            completed += 1;
            manager.sync(EntitySync::new(*entity, row.clone(), |task: &mut TaskRow| {
                task.done = true;
            })?);
        } else {
            manager.sync(EntitySync::watch(*entity, row.clone())?);
        }
    }

    manager.sync(EntitySync::new(project_entity, project.clone(), move |p: &mut ProjectRow| {
        p.open_tasks -= completed;
    })?);

    manager.sync(EntitySync::new(audit_entity, audit.clone(), |a: &mut AuditRow| {
        a.message = "superseded".to_string();
    })?);
    manager.destroy(&audit_entity);
    manager.procedure(Recount);

    let pending = manager.pending();
    info!(total = pending.total(), "Second unit queued");

    let report = manager.flush_in(store.as_ref()).await?;
    print_report("Unit 2: complete / archive / delete", &report);

    println!("Rows left in store: {}", store.row_count());
    println!("DataSource calls:   {}", store.journal().len());

    Ok(())
}
