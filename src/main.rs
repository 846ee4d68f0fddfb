use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use influence_tables::config::Config;
use influence_tables::engine::rebuild_issues;
use influence_tables::storage::SqliteDiagramStore;

/// Maintenance tool for influence-diagram discrete tables
#[derive(Parser)]
#[command(name = "influence-tables", version, about)]
struct Cli {
    /// Database path, overriding DATABASE_PATH
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Force a synchronous rebuild of the given issues' derived tables
    Rebuild {
        /// Issue ids to rebuild
        #[arg(required = true)]
        issues: Vec<Uuid>,
    },
    /// Print row counts for the graph and derived tables
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    init_logging(&config);

    let store = match SqliteDiagramStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Rebuild { issues } => {
            let mut tx = store.begin().await?;
            let report = rebuild_issues(&mut tx, &issues).await?;
            tx.commit().await?;

            info!(
                rebuilt_tables = report.rebuilt_tables,
                probability_rows = report.probability_rows,
                utility_rows = report.utility_rows,
                "rebuild complete"
            );
            println!(
                "rebuilt {} tables ({} probability rows, {} utility rows)",
                report.rebuilt_tables, report.probability_rows, report.utility_rows
            );
        }
        Command::Status => {
            let stats = store.table_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        influence_tables::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        influence_tables::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
