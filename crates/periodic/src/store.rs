//! Persistence trait for task and schedule records.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    Result,
    types::{DeclaredTask, PersistedTask, Schedule, ScheduleFields},
};

/// Selects schedule records for lookup or deletion.
///
/// Suffix matching is a plain trailing-substring test on the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleFilter {
    All,
    Ids(Vec<i64>),
    NameEndsWith(String),
    /// Name ends with the suffix and no task record links to the schedule.
    UnlinkedNameEndsWith(String),
}

impl ScheduleFilter {
    /// Whether `schedule` is selected, given the ids of all linked schedules.
    pub fn matches(&self, schedule: &Schedule, linked: &HashSet<i64>) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&schedule.id),
            Self::NameEndsWith(suffix) => schedule.name.ends_with(suffix.as_str()),
            Self::UnlinkedNameEndsWith(suffix) => {
                !linked.contains(&schedule.id) && schedule.name.ends_with(suffix.as_str())
            },
        }
    }
}

/// Persistence backend for registered tasks and their schedules.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<PersistedTask>>;

    /// Create or update the task record named `task.name`.
    ///
    /// Returns the stored record and whether it was created.
    async fn upsert_task(&self, task: &DeclaredTask) -> Result<(PersistedTask, bool)>;

    /// Delete task records by id. Linked schedules are left in place.
    async fn delete_tasks(&self, ids: &[i64]) -> Result<u64>;

    /// Create a schedule that no task links to.
    async fn create_schedule(&self, fields: &ScheduleFields) -> Result<Schedule>;

    /// Create a schedule and link it to `task_id` in one step.
    async fn create_linked_schedule(
        &self,
        task_id: i64,
        fields: &ScheduleFields,
    ) -> Result<Schedule>;

    /// Overwrite a schedule's fields, keeping its id.
    async fn update_schedule(&self, id: i64, fields: &ScheduleFields) -> Result<()>;

    async fn find_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>>;

    /// Delete matching schedules and clear task links pointing at them.
    async fn delete_schedules(&self, filter: &ScheduleFilter) -> Result<u64>;
}
