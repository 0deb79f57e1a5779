mod config_commands;
mod db_commands;
mod registry_commands;
mod tasks;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    qregistry_config::QRegistryConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "qregistry", about = "qregistry: keep periodic task schedules in sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides discovery of qregistry.{toml,yaml,yml,json}).
    #[arg(long, global = true, env = "QREGISTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (overrides config and QREGISTRY_DATABASE_URL).
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the configured tasks with the database.
    Sync {
        /// Print the reconciliation report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the tasks declared by the configuration.
    List,
    /// Show persisted tasks and schedules.
    Status,
    /// Delete every registered task and its schedule.
    Purge {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Database management (reset, clear, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load the config file, then apply environment and command-line overrides.
fn load_settings(cli: &Cli) -> anyhow::Result<QRegistryConfig> {
    let config = match cli.config {
        Some(ref path) => qregistry_config::load_config(path)?,
        None => qregistry_config::discover_and_load()?,
    };
    let mut config = qregistry_config::apply_env_overrides(config);
    if let Some(ref url) = cli.database_url {
        config.database.url = Some(url.clone());
    }
    debug!(
        suffix = %config.registry.suffix,
        tasks = config.registry.tasks.len(),
        "configuration loaded"
    );
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "qregistry starting");

    match cli.command {
        Commands::Config { ref action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Commands::Sync { json } => registry_commands::sync(&load_settings(&cli)?, json).await,
        Commands::List => registry_commands::list(&load_settings(&cli)?),
        Commands::Status => registry_commands::status(&load_settings(&cli)?).await,
        Commands::Purge { yes } => registry_commands::purge(&load_settings(&cli)?, yes).await,
        Commands::Db { ref action } => db_commands::handle_db(action, &load_settings(&cli)?).await,
    }
}
