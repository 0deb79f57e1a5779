//! Reconciliation between the task registry and persisted records.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use {
    serde::Serialize,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, LEGACY_SUFFIX, Result,
    registry::TaskRegistry,
    store::{RegistryStore, ScheduleFilter},
    types::{DeclaredTask, PersistedTask, Task},
};

/// A registry entry `sync` refused to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTask {
    pub task_id: i64,
    pub name: String,
    pub reason: String,
}

/// Outcome of [`Reconciler::sync`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Task records backing the registry, one per id, ordered by id.
    pub reconciled: Vec<PersistedTask>,
    pub skipped: Vec<SkippedTask>,
    pub tasks_created: usize,
    pub tasks_updated: usize,
    pub schedules_created: usize,
    pub schedules_updated: usize,
}

impl SyncReport {
    /// Ids of the reconciled task records.
    pub fn reconciled_ids(&self) -> BTreeSet<i64> {
        self.reconciled.iter().map(|t| t.id).collect()
    }

    /// Ids cleanup must keep: reconciled records plus skipped entries,
    /// which are still members of the registry.
    pub fn keep_ids(&self) -> BTreeSet<i64> {
        let mut keep = self.reconciled_ids();
        keep.extend(self.skipped.iter().map(|s| s.task_id));
        keep
    }
}

/// Outcome of [`Reconciler::cleanup_dangling`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted_tasks: u64,
    /// Schedules that belonged to the deleted tasks.
    pub deleted_schedules: u64,
    /// Unlinked schedules carrying the current suffix.
    pub orphaned_schedules: u64,
    /// Schedules carrying the legacy suffix.
    pub legacy_schedules: u64,
    /// Kept tasks whose linked schedule was removed by the legacy sweep.
    pub unlinked_tasks: Vec<i64>,
}

impl CleanupReport {
    pub fn total_schedules(&self) -> u64 {
        self.deleted_schedules + self.orphaned_schedules + self.legacy_schedules
    }
}

/// Brings persisted task and schedule records in line with a registry.
pub struct Reconciler {
    store: Arc<dyn RegistryStore>,
    suffix: String,
}

impl Reconciler {
    /// Create a reconciler that names schedules `<task name><suffix>`.
    ///
    /// The suffix must be non-empty and must not end with [`LEGACY_SUFFIX`],
    /// since both are used to select schedules for deletion.
    pub fn new(store: Arc<dyn RegistryStore>, suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Err(Error::invalid_suffix(suffix, "suffix must not be empty"));
        }
        if suffix.ends_with(LEGACY_SUFFIX) {
            return Err(Error::invalid_suffix(
                suffix,
                format!("suffix must not end with the legacy suffix {LEGACY_SUFFIX:?}"),
            ));
        }
        Ok(Self { store, suffix })
    }

    pub fn from_config(
        store: Arc<dyn RegistryStore>,
        config: &qregistry_config::RegistryConfig,
    ) -> Result<Self> {
        Self::new(store, config.suffix.clone())
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Persist every declared task of `registry` and its schedule.
    ///
    /// Entries that are already persisted are logged and skipped. Store
    /// errors abort the batch.
    pub async fn sync(&self, registry: &TaskRegistry) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut reconciled: BTreeMap<i64, PersistedTask> = BTreeMap::new();
        let mut seen_names: HashMap<&str, &str> = HashMap::new();

        for task in registry.tasks() {
            let declared = match task {
                Task::Declared(declared) => declared,
                Task::Persisted(persisted) => {
                    let err = Error::AlreadyRegistered {
                        task_id: persisted.id,
                    };
                    error!(task_id = persisted.id, name = %persisted.name, "{err}");
                    report.skipped.push(SkippedTask {
                        task_id: persisted.id,
                        name: persisted.name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                },
            };

            if let Some(previous) = seen_names.insert(&declared.name, &declared.target) {
                warn!(
                    name = %declared.name,
                    previous = previous,
                    target = %declared.target,
                    "task name declared more than once, entries share one record"
                );
            }

            let record = self.sync_task(declared, &mut report).await?;
            reconciled.insert(record.id, record);
        }

        report.reconciled = reconciled.into_values().collect();
        info!(
            reconciled = report.reconciled.len(),
            skipped = report.skipped.len(),
            tasks_created = report.tasks_created,
            schedules_created = report.schedules_created,
            "registry synced"
        );
        Ok(report)
    }

    async fn sync_task(
        &self,
        declared: &DeclaredTask,
        report: &mut SyncReport,
    ) -> Result<PersistedTask> {
        let (mut record, created) = self.store.upsert_task(declared).await?;
        if created {
            report.tasks_created += 1;
        } else {
            report.tasks_updated += 1;
        }

        let fields = declared.to_schedule_fields(&self.suffix);
        if let Some(schedule_id) = record.schedule_id {
            match self.store.update_schedule(schedule_id, &fields).await {
                Ok(()) => {
                    report.schedules_updated += 1;
                    debug!(task_id = record.id, schedule_id, "schedule updated");
                    return Ok(record);
                },
                Err(Error::ScheduleNotFound { .. }) => {
                    warn!(task_id = record.id, schedule_id, "linked schedule missing, recreating");
                },
                Err(e) => return Err(e),
            }
        }

        let schedule = self.store.create_linked_schedule(record.id, &fields).await?;
        report.schedules_created += 1;
        debug!(task_id = record.id, schedule_id = schedule.id, name = %schedule.name, "schedule created");
        record.schedule_id = Some(schedule.id);
        Ok(record)
    }

    /// Delete records that no longer back the registry.
    ///
    /// Removes task records not in `keep` together with their schedules,
    /// then unlinked schedules ending with the suffix, then every schedule
    /// ending with [`LEGACY_SUFFIX`].
    pub async fn cleanup_dangling(&self, keep: &BTreeSet<i64>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let (dangling, kept): (Vec<PersistedTask>, Vec<PersistedTask>) = self
            .store
            .list_tasks()
            .await?
            .into_iter()
            .partition(|t| !keep.contains(&t.id));

        if !dangling.is_empty() {
            let task_ids: Vec<i64> = dangling.iter().map(|t| t.id).collect();
            let schedule_ids: Vec<i64> = dangling.iter().filter_map(|t| t.schedule_id).collect();
            report.deleted_tasks = self.store.delete_tasks(&task_ids).await?;
            if !schedule_ids.is_empty() {
                report.deleted_schedules = self
                    .store
                    .delete_schedules(&ScheduleFilter::Ids(schedule_ids))
                    .await?;
            }
        }

        report.orphaned_schedules = self
            .store
            .delete_schedules(&ScheduleFilter::UnlinkedNameEndsWith(self.suffix.clone()))
            .await?;

        let legacy = ScheduleFilter::NameEndsWith(LEGACY_SUFFIX.to_string());
        let legacy_ids: BTreeSet<i64> = self
            .store
            .find_schedules(&legacy)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        report.unlinked_tasks = kept
            .iter()
            .filter(|t| t.schedule_id.is_some_and(|id| legacy_ids.contains(&id)))
            .map(|t| t.id)
            .collect();
        report.legacy_schedules = self.store.delete_schedules(&legacy).await?;
        if !report.unlinked_tasks.is_empty() {
            warn!(
                tasks = ?report.unlinked_tasks,
                "legacy sweep removed schedules of kept tasks, the next sync recreates them"
            );
        }

        info!(
            deleted_tasks = report.deleted_tasks,
            deleted_schedules = report.deleted_schedules,
            orphaned_schedules = report.orphaned_schedules,
            legacy_schedules = report.legacy_schedules,
            "dangling records cleaned up"
        );
        Ok(report)
    }

    /// Delete every task record and its linked schedule.
    ///
    /// Unlinked schedules are left alone. Returns the number of tasks deleted.
    pub async fn unregister_all(&self) -> Result<u64> {
        let tasks = self.store.list_tasks().await?;
        let task_ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let schedule_ids: Vec<i64> = tasks.iter().filter_map(|t| t.schedule_id).collect();

        let deleted = self.store.delete_tasks(&task_ids).await?;
        let schedules = if schedule_ids.is_empty() {
            0
        } else {
            self.store
                .delete_schedules(&ScheduleFilter::Ids(schedule_ids))
                .await?
        };
        info!(tasks = deleted, schedules, "unregistered all tasks");
        Ok(deleted)
    }
}
