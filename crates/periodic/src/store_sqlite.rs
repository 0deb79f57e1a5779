//! SQLite-backed registry store using sqlx.

use std::{collections::HashSet, str::FromStr};

use {
    async_trait::async_trait,
    sqlx::{
        Executor, QueryBuilder, Row, Sqlite, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
    tracing::debug,
};

use crate::{
    Error, Result,
    error::Context,
    store::{RegistryStore, ScheduleFilter},
    types::{DeclaredTask, Params, PersistedTask, Schedule, ScheduleFields},
};

/// SQLite-backed persistence for task and schedule records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other tables, use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {database_url}"))?
            .foreign_keys(true);

        // Every connection to `:memory:` opens a distinct database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Remove every task and schedule record, keeping the schema.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM registered_tasks")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM schedules")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn parse_params(raw: &str) -> Result<Params> {
    Ok(serde_json::from_str(raw)?)
}

fn task_from_row(row: &SqliteRow) -> Result<PersistedTask> {
    let params: String = row.try_get("params")?;
    Ok(PersistedTask {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        target: row.try_get("func")?,
        params: parse_params(&params)?,
        schedule_id: row.try_get("schedule_id")?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    let params: String = row.try_get("params")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        func: row.try_get("func")?,
        params: parse_params(&params)?,
    })
}

/// `SELECT` over schedules restricted by the parts of `filter` SQL can
/// express. Name suffixes are matched afterwards, see [`ScheduleFilter::matches`].
fn select_schedules(filter: &ScheduleFilter) -> QueryBuilder<'_, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT id, name, func, params FROM schedules");
    match filter {
        ScheduleFilter::All | ScheduleFilter::NameEndsWith(_) => {},
        ScheduleFilter::Ids(ids) => {
            qb.push(" WHERE id IN (");
            let mut ids_list = qb.separated(", ");
            for id in ids {
                ids_list.push_bind(*id);
            }
            ids_list.push_unseparated(")");
        },
        ScheduleFilter::UnlinkedNameEndsWith(_) => {
            qb.push(
                " WHERE NOT EXISTS \
                 (SELECT 1 FROM registered_tasks t WHERE t.schedule_id = schedules.id)",
            );
        },
    }
    qb.push(" ORDER BY id");
    qb
}

/// Schedules matching `filter`, read through `executor` so deletions can
/// select and delete inside one transaction.
async fn fetch_schedules<'e, E>(executor: E, filter: &ScheduleFilter) -> Result<Vec<Schedule>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if matches!(filter, ScheduleFilter::Ids(ids) if ids.is_empty()) {
        return Ok(Vec::new());
    }
    let rows = select_schedules(filter).build().fetch_all(executor).await?;

    // Linkage is already applied in SQL.
    let no_links = HashSet::new();
    let mut schedules = Vec::with_capacity(rows.len());
    for row in &rows {
        let schedule = schedule_from_row(row)?;
        if filter.matches(&schedule, &no_links) {
            schedules.push(schedule);
        }
    }
    Ok(schedules)
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn list_tasks(&self) -> Result<Vec<PersistedTask>> {
        let rows = sqlx::query(
            "SELECT id, name, func, params, schedule_id FROM registered_tasks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn upsert_task(&self, task: &DeclaredTask) -> Result<(PersistedTask, bool)> {
        let params = serde_json::to_string(&task.params)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM registered_tasks WHERE name = ?")
                .bind(&task.name)
                .fetch_optional(&mut *tx)
                .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query("UPDATE registered_tasks SET func = ?, params = ? WHERE id = ?")
                    .bind(&task.target)
                    .bind(&params)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                id
            },
            None => sqlx::query("INSERT INTO registered_tasks (name, func, params) VALUES (?, ?, ?)")
                .bind(&task.name)
                .bind(&task.target)
                .bind(&params)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid(),
        };

        let row = sqlx::query(
            "SELECT id, name, func, params, schedule_id FROM registered_tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((task_from_row(&row)?, existing.is_none()))
    }

    async fn delete_tasks(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM registered_tasks WHERE id IN (");
        let mut ids_list = qb.separated(", ");
        for id in ids {
            ids_list.push_bind(*id);
        }
        ids_list.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn create_schedule(&self, fields: &ScheduleFields) -> Result<Schedule> {
        let params = serde_json::to_string(&fields.params)?;
        let id = sqlx::query("INSERT INTO schedules (name, func, params) VALUES (?, ?, ?)")
            .bind(&fields.name)
            .bind(&fields.func)
            .bind(&params)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(Schedule::from_fields(id, fields))
    }

    async fn create_linked_schedule(
        &self,
        task_id: i64,
        fields: &ScheduleFields,
    ) -> Result<Schedule> {
        let params = serde_json::to_string(&fields.params)?;
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query("INSERT INTO schedules (name, func, params) VALUES (?, ?, ?)")
            .bind(&fields.name)
            .bind(&fields.func)
            .bind(&params)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let linked = sqlx::query("UPDATE registered_tasks SET schedule_id = ? WHERE id = ?")
            .bind(id)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        if linked.rows_affected() == 0 {
            // Dropping `tx` rolls the insert back.
            return Err(Error::TaskNotFound { task_id });
        }

        tx.commit().await?;
        Ok(Schedule::from_fields(id, fields))
    }

    async fn update_schedule(&self, id: i64, fields: &ScheduleFields) -> Result<()> {
        let params = serde_json::to_string(&fields.params)?;
        let result = sqlx::query("UPDATE schedules SET name = ?, func = ?, params = ? WHERE id = ?")
            .bind(&fields.name)
            .bind(&fields.func)
            .bind(&params)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ScheduleNotFound { schedule_id: id });
        }
        Ok(())
    }

    async fn find_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>> {
        fetch_schedules(&self.pool, filter).await
    }

    async fn delete_schedules(&self, filter: &ScheduleFilter) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<i64> = fetch_schedules(&mut *tx, filter)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut unlink: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE registered_tasks SET schedule_id = NULL WHERE schedule_id IN (");
        let mut ids_list = unlink.separated(", ");
        for id in &ids {
            ids_list.push_bind(*id);
        }
        ids_list.push_unseparated(")");
        unlink.build().execute(&mut *tx).await?;

        let mut delete: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM schedules WHERE id IN (");
        let mut ids_list = delete.separated(", ");
        for id in &ids {
            ids_list.push_bind(*id);
        }
        ids_list.push_unseparated(")");
        let result = delete.build().execute(&mut *tx).await?;

        tx.commit().await?;
        debug!(count = result.rows_affected(), "deleted schedules");
        Ok(result.rows_affected())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn declared(name: &str) -> DeclaredTask {
        let mut params = Params::new();
        params.insert("schedule_type".into(), json!("C"));
        params.insert("cron".into(), json!("*/5 * * * *"));
        DeclaredTask::new(name, format!("app.jobs.{name}"), params)
    }

    fn fields(name: &str) -> ScheduleFields {
        ScheduleFields {
            name: name.into(),
            func: "app.jobs.run".into(),
            params: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_upsert() {
        let store = make_store().await;
        let (first, created) = store.upsert_task(&declared("a")).await.unwrap();
        assert!(created);
        assert_eq!(first.params["cron"], "*/5 * * * *");

        let mut changed = declared("a");
        changed.target = "app.jobs.other".into();
        let (second, created) = store.upsert_task(&changed).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.target, "app.jobs.other");
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_linked_schedule() {
        let store = make_store().await;
        let (task, _) = store.upsert_task(&declared("a")).await.unwrap();
        let schedule = store
            .create_linked_schedule(task.id, &fields("a - QREGISTRY"))
            .await
            .unwrap();

        let tasks = store.list_tasks().await.unwrap();
        assert_eq!(tasks[0].schedule_id, Some(schedule.id));
    }

    #[tokio::test]
    async fn test_sqlite_linked_schedule_rolls_back() {
        let store = make_store().await;
        let err = store
            .create_linked_schedule(42, &fields("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound { task_id: 42 }));
        assert!(
            store
                .find_schedules(&ScheduleFilter::All)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_sqlite_update_schedule() {
        let store = make_store().await;
        let schedule = store.create_schedule(&fields("old")).await.unwrap();
        let mut new_fields = fields("new");
        new_fields.params.insert("minutes".into(), json!(10));
        store
            .update_schedule(schedule.id, &new_fields)
            .await
            .unwrap();

        let all = store.find_schedules(&ScheduleFilter::All).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, schedule.id);
        assert_eq!(all[0].name, "new");
        assert_eq!(all[0].params["minutes"], 10);
    }

    #[tokio::test]
    async fn test_sqlite_update_schedule_not_found() {
        let store = make_store().await;
        let err = store.update_schedule(7, &fields("x")).await.unwrap_err();
        assert!(matches!(err, Error::ScheduleNotFound { schedule_id: 7 }));
    }

    #[tokio::test]
    async fn test_sqlite_find_by_filter() {
        let store = make_store().await;
        let (task, _) = store.upsert_task(&declared("a")).await.unwrap();
        let linked = store
            .create_linked_schedule(task.id, &fields("a - QREGISTRY"))
            .await
            .unwrap();
        let orphan = store.create_schedule(&fields("y - QREGISTRY")).await.unwrap();
        let legacy = store.create_schedule(&fields("x - CRON")).await.unwrap();
        store.create_schedule(&fields("z")).await.unwrap();

        let ids = |schedules: Vec<Schedule>| schedules.into_iter().map(|s| s.id).collect::<Vec<_>>();

        let suffixed = store
            .find_schedules(&ScheduleFilter::NameEndsWith(" - QREGISTRY".into()))
            .await
            .unwrap();
        assert_eq!(ids(suffixed), vec![linked.id, orphan.id]);

        let orphans = store
            .find_schedules(&ScheduleFilter::UnlinkedNameEndsWith(" - QREGISTRY".into()))
            .await
            .unwrap();
        assert_eq!(ids(orphans), vec![orphan.id]);

        let by_id = store
            .find_schedules(&ScheduleFilter::Ids(vec![legacy.id]))
            .await
            .unwrap();
        assert_eq!(ids(by_id), vec![legacy.id]);

        let none = store
            .find_schedules(&ScheduleFilter::Ids(Vec::new()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_delete_schedules_clears_links() {
        let store = make_store().await;
        let (task, _) = store.upsert_task(&declared("a")).await.unwrap();
        store
            .create_linked_schedule(task.id, &fields("a - CRON"))
            .await
            .unwrap();

        let deleted = store
            .delete_schedules(&ScheduleFilter::NameEndsWith(" - CRON".into()))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.list_tasks().await.unwrap()[0].schedule_id, None);
    }

    #[tokio::test]
    async fn test_sqlite_delete_unlinked_keeps_linked() {
        let store = make_store().await;
        let (task, _) = store.upsert_task(&declared("a")).await.unwrap();
        let linked = store
            .create_linked_schedule(task.id, &fields("a - QREGISTRY"))
            .await
            .unwrap();
        store.create_schedule(&fields("y - QREGISTRY")).await.unwrap();
        store.create_schedule(&fields("z - QREGISTRY")).await.unwrap();

        let deleted = store
            .delete_schedules(&ScheduleFilter::UnlinkedNameEndsWith(" - QREGISTRY".into()))
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let all = store.find_schedules(&ScheduleFilter::All).await.unwrap();
        assert_eq!(all, vec![linked.clone()]);
        assert_eq!(
            store.list_tasks().await.unwrap()[0].schedule_id,
            Some(linked.id)
        );

        // Nothing left to match: the transaction is dropped without writes.
        let deleted = store
            .delete_schedules(&ScheduleFilter::UnlinkedNameEndsWith(" - QREGISTRY".into()))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(
            store
                .delete_schedules(&ScheduleFilter::Ids(Vec::new()))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_sqlite_delete_tasks() {
        let store = make_store().await;
        let (a, _) = store.upsert_task(&declared("a")).await.unwrap();
        let (b, _) = store.upsert_task(&declared("b")).await.unwrap();
        assert_eq!(store.delete_tasks(&[a.id, 99]).await.unwrap(), 1);
        assert_eq!(store.delete_tasks(&[]).await.unwrap(), 0);
        let remaining = store.list_tasks().await.unwrap();
        assert_eq!(remaining, vec![b]);
    }

    #[tokio::test]
    async fn test_sqlite_clear() {
        let store = make_store().await;
        let (task, _) = store.upsert_task(&declared("a")).await.unwrap();
        store
            .create_linked_schedule(task.id, &fields("a - QREGISTRY"))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.list_tasks().await.unwrap().is_empty());
        assert!(
            store
                .find_schedules(&ScheduleFilter::All)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
