use std::path::PathBuf;

use {anyhow::Context, clap::Subcommand, qregistry_config::QRegistryConfig};

use qregistry_periodic::store_sqlite::SqliteStore;

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the database file completely.
    Reset,
    /// Clear all task and schedule records but keep the schema intact.
    Clear,
    /// Run all pending database migrations.
    Migrate,
}

/// Resolve the database URL, creating the data directory for the default one.
pub fn database_url(config: &QRegistryConfig) -> anyhow::Result<String> {
    if let Some(ref url) = config.database.url {
        return Ok(url.clone());
    }
    let data_dir = qregistry_config::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    Ok(qregistry_config::default_database_url())
}

/// File path behind a `sqlite:` URL, or `None` for in-memory databases.
fn db_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split_once('?').map_or(rest, |(path, _)| path);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

pub async fn handle_db(action: &DbAction, config: &QRegistryConfig) -> anyhow::Result<()> {
    let url = database_url(config)?;
    match action {
        DbAction::Reset => reset_database(&url),
        DbAction::Clear => clear_database(&url).await,
        DbAction::Migrate => run_migrations(&url).await,
    }
}

/// Delete the database file along with its WAL and SHM files.
fn reset_database(url: &str) -> anyhow::Result<()> {
    let Some(db) = db_path(url) else {
        println!("Database {url} is not backed by a file.");
        return Ok(());
    };

    let mut deleted = false;
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{suffix}", db.display()));
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database files deleted. Run `qregistry db migrate` to recreate them.");
    } else {
        println!("No database files found.");
    }
    Ok(())
}

async fn clear_database(url: &str) -> anyhow::Result<()> {
    if db_path(url).is_some_and(|path| !path.exists()) {
        println!("Database not found: {url}");
        return Ok(());
    }
    let store = SqliteStore::new(url).await?;
    store.clear().await?;
    store.pool().close().await;
    println!("Cleared tables: registered_tasks, schedules");
    Ok(())
}

async fn run_migrations(url: &str) -> anyhow::Result<()> {
    println!("Running migrations for {url}...");
    let pool = sqlx::SqlitePool::connect(url).await?;
    qregistry_periodic::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("registry migrations failed: {e}"))?;
    pool.close().await;
    println!("All migrations complete.");
    Ok(())
}
