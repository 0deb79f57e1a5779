//! In-memory store for tests and dry runs.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::{RegistryStore, ScheduleFilter},
    types::{DeclaredTask, PersistedTask, Schedule, ScheduleFields},
};

#[derive(Default)]
struct Tables {
    tasks: BTreeMap<i64, PersistedTask>,
    schedules: BTreeMap<i64, Schedule>,
    last_task_id: i64,
    last_schedule_id: i64,
}

impl Tables {
    fn linked_schedule_ids(&self) -> HashSet<i64> {
        self.tasks.values().filter_map(|t| t.schedule_id).collect()
    }

    fn insert_schedule(&mut self, fields: &ScheduleFields) -> Schedule {
        self.last_schedule_id += 1;
        let schedule = Schedule::from_fields(self.last_schedule_id, fields);
        self.schedules.insert(schedule.id, schedule.clone());
        schedule
    }
}

/// In-memory store backed by `BTreeMap`s. No persistence.
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn list_tasks(&self) -> Result<Vec<PersistedTask>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.tasks.values().cloned().collect())
    }

    async fn upsert_task(&self, task: &DeclaredTask) -> Result<(PersistedTask, bool)> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = tables.tasks.values_mut().find(|t| t.name == task.name) {
            existing.target = task.target.clone();
            existing.params = task.params.clone();
            return Ok((existing.clone(), false));
        }

        tables.last_task_id += 1;
        let record = PersistedTask {
            id: tables.last_task_id,
            name: task.name.clone(),
            target: task.target.clone(),
            params: task.params.clone(),
            schedule_id: None,
        };
        tables.tasks.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn delete_tasks(&self, ids: &[i64]) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let deleted = ids
            .iter()
            .filter(|id| tables.tasks.remove(*id).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn create_schedule(&self, fields: &ScheduleFields) -> Result<Schedule> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.insert_schedule(fields))
    }

    async fn create_linked_schedule(
        &self,
        task_id: i64,
        fields: &ScheduleFields,
    ) -> Result<Schedule> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if !tables.tasks.contains_key(&task_id) {
            return Err(Error::TaskNotFound { task_id });
        }
        let schedule = tables.insert_schedule(fields);
        if let Some(task) = tables.tasks.get_mut(&task_id) {
            task.schedule_id = Some(schedule.id);
        }
        Ok(schedule)
    }

    async fn update_schedule(&self, id: i64, fields: &ScheduleFields) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let schedule = tables
            .schedules
            .get_mut(&id)
            .ok_or(Error::ScheduleNotFound { schedule_id: id })?;
        *schedule = Schedule::from_fields(id, fields);
        Ok(())
    }

    async fn find_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let linked = tables.linked_schedule_ids();
        Ok(tables
            .schedules
            .values()
            .filter(|s| filter.matches(s, &linked))
            .cloned()
            .collect())
    }

    async fn delete_schedules(&self, filter: &ScheduleFilter) -> Result<u64> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let linked = tables.linked_schedule_ids();
        let doomed: HashSet<i64> = tables
            .schedules
            .values()
            .filter(|s| filter.matches(s, &linked))
            .map(|s| s.id)
            .collect();

        tables.schedules.retain(|id, _| !doomed.contains(id));
        for task in tables.tasks.values_mut() {
            if task.schedule_id.is_some_and(|id| doomed.contains(&id)) {
                task.schedule_id = None;
            }
        }
        Ok(doomed.len() as u64)
    }
}
