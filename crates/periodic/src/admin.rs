//! Administrative entry point: one full reconciliation run.

use {serde::Serialize, tracing::info};

use crate::{
    Result,
    reconcile::{CleanupReport, Reconciler, SyncReport},
    registry::TaskRegistry,
};

/// Outcome of [`run_reconciliation`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub sync: SyncReport,
    pub cleanup: CleanupReport,
}

/// Sync `registry` into the store, then delete everything it no longer
/// declares.
///
/// Skipped entries are logged and do not fail the run; their records are
/// kept. Store errors do fail it.
pub async fn run_reconciliation(
    registry: &TaskRegistry,
    reconciler: &Reconciler,
) -> Result<ReconcileReport> {
    info!(tasks = registry.len(), suffix = %reconciler.suffix(), "reconciling task registry");

    // Skipped entries are logged by `sync` itself.
    let sync = reconciler.sync(registry).await?;
    let cleanup = reconciler.cleanup_dangling(&sync.keep_ids()).await?;

    info!(
        reconciled = sync.reconciled.len(),
        skipped = sync.skipped.len(),
        deleted_tasks = cleanup.deleted_tasks,
        deleted_schedules = cleanup.total_schedules(),
        "reconciliation complete"
    );

    Ok(ReconcileReport { sync, cleanup })
}
