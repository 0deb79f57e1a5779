//! Periodic task registry.
//!
//! Tasks are declared in code or static configuration into a
//! [`registry::TaskRegistry`], then reconciled against persisted task and
//! schedule records by a [`reconcile::Reconciler`]. Schedules are executed by
//! an external scheduler; this crate only keeps its records in sync.

pub mod admin;
pub mod error;
pub mod function;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    qregistry_config::{DEFAULT_SUFFIX, LEGACY_SUFFIX},
};

/// Run database migrations for the registry tables.
///
/// This creates the `schedules` and `registered_tasks` tables. Should be
/// called at startup when using [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
