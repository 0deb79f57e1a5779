use std::sync::Arc;

use {
    anyhow::Result,
    qregistry_config::QRegistryConfig,
    qregistry_periodic::{
        admin::{ReconcileReport, run_reconciliation},
        reconcile::Reconciler,
        registry::TaskRegistry,
        store::{RegistryStore, ScheduleFilter},
        store_sqlite::SqliteStore,
    },
};

use crate::{db_commands, tasks};

/// Build the registry from the static tasks in `config`.
fn build_registry(config: &QRegistryConfig) -> Result<TaskRegistry> {
    let catalog = tasks::builtin_catalog();
    Ok(TaskRegistry::from_config(&config.registry, &catalog)?)
}

async fn open_store(config: &QRegistryConfig) -> Result<Arc<SqliteStore>> {
    let url = db_commands::database_url(config)?;
    Ok(Arc::new(SqliteStore::new(&url).await?))
}

async fn reconciler(config: &QRegistryConfig) -> Result<Reconciler> {
    let store = open_store(config).await?;
    Ok(Reconciler::from_config(store, &config.registry)?)
}

pub async fn sync(config: &QRegistryConfig, json: bool) -> Result<()> {
    let registry = build_registry(config)?;
    let reconciler = reconciler(config).await?;
    let report = run_reconciliation(&registry, &reconciler).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    let sync = &report.sync;
    let cleanup = &report.cleanup;
    println!(
        "Tasks:     {} reconciled ({} created, {} updated), {} skipped",
        sync.reconciled.len(),
        sync.tasks_created,
        sync.tasks_updated,
        sync.skipped.len()
    );
    println!(
        "Schedules: {} created, {} updated",
        sync.schedules_created, sync.schedules_updated
    );
    println!(
        "Cleanup:   {} task(s), {} schedule(s) ({} dangling, {} orphaned, {} legacy)",
        cleanup.deleted_tasks,
        cleanup.total_schedules(),
        cleanup.deleted_schedules,
        cleanup.orphaned_schedules,
        cleanup.legacy_schedules
    );
    for skipped in &sync.skipped {
        println!("  skipped {} ({}): {}", skipped.name, skipped.task_id, skipped.reason);
    }
}

/// Print one JSON object per declared task.
pub fn list(config: &QRegistryConfig) -> Result<()> {
    let registry = build_registry(config)?;
    if registry.is_empty() {
        eprintln!("No tasks declared.");
        return Ok(());
    }
    for entry in registry.iter() {
        println!("{}", serde_json::Value::Object(entry));
    }
    Ok(())
}

pub async fn status(config: &QRegistryConfig) -> Result<()> {
    let store = open_store(config).await?;
    let tasks = store.list_tasks().await?;
    let schedules = store.find_schedules(&ScheduleFilter::All).await?;

    println!("Tasks ({}):", tasks.len());
    for task in &tasks {
        let schedule = task
            .schedule_id
            .map(|id| format!("schedule {id}"))
            .unwrap_or_else(|| "no schedule".into());
        println!("  {:>4}  {}  {}  [{schedule}]", task.id, task.name, task.target);
    }

    println!("Schedules ({}):", schedules.len());
    for schedule in &schedules {
        println!("  {:>4}  {}  {}", schedule.id, schedule.name, schedule.func);
    }
    Ok(())
}

pub async fn purge(config: &QRegistryConfig, yes: bool) -> Result<()> {
    if !yes {
        eprintln!("This deletes every registered task and its schedule. Re-run with --yes.");
        return Ok(());
    }
    let reconciler = reconciler(config).await?;
    let deleted = reconciler.unregister_all().await?;
    println!("Unregistered {deleted} task(s).");
    Ok(())
}
