mod commands;
mod logging;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::status::StatusFormat;
use commands::ConnectionArgs;
use logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Versioned SQL migrations for PostgreSQL and SQL Server")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log level when RUST_LOG is not set
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Apply only migrations up to and including this version
        #[arg(long)]
        target_version: Option<String>,

        /// List pending migrations without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations down to and including a version
    Rollback {
        /// Oldest version to roll back
        #[arg(long)]
        target_version: String,
    },

    /// Show applied, pending and orphaned migrations
    Status {
        #[arg(long, value_enum, default_value_t = StatusFormat::Table)]
        format: StatusFormat,
    },

    /// Record a version as applied without running it
    Baseline {
        /// Version to record
        #[arg(long)]
        version: String,
    },

    /// Run seed scripts
    Seed {
        /// Directory of seed scripts
        #[arg(long, env = "SEEDS_PATH", default_value = "seeds")]
        seeds_path: PathBuf,
    },

    /// Create a new migration file
    New {
        /// Migration name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig::new(cli.log_level.clone(), cli.json_logs);
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let connection = &cli.connection;

    match cli.command {
        Commands::Migrate {
            target_version,
            dry_run,
        } => {
            commands::migrate::run(connection, target_version.as_deref(), dry_run).await?;
        }
        Commands::Rollback { target_version } => {
            commands::rollback::run(connection, &target_version).await?;
        }
        Commands::Status { format } => {
            commands::status::run(connection, format).await?;
        }
        Commands::Baseline { version } => {
            commands::baseline::run(connection, &version).await?;
        }
        Commands::Seed { seeds_path } => {
            commands::seed::run(connection, &seeds_path).await?;
        }
        Commands::New { name } => {
            let dir = connection
                .migrations_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("migrations"));
            commands::new::create(&dir, &name)?;
        }
    }

    Ok(())
}
