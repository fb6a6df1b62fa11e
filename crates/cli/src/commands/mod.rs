pub mod baseline;
pub mod migrate;
pub mod new;
pub mod rollback;
pub mod seed;
pub mod status;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use strata_migrate::{BackendType, MigrationConfig, MigrationEngine};

use crate::utils::{detect_provider, mask_connection_string};

/// Options shared by every command that talks to a database
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Full database connection string
    #[arg(long, global = true, env = "DB_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Database provider (postgresql or sqlserver); detected from the connection string when omitted
    #[arg(long, global = true, env = "DB_PROVIDER")]
    pub provider: Option<String>,

    /// Directory of migration files; bundled migrations are used when absent
    #[arg(long, global = true, env = "MIGRATIONS_PATH")]
    pub migrations_path: Option<PathBuf>,
}

impl ConnectionArgs {
    /// Connection string and backend to run against
    pub fn resolve(&self) -> Result<(String, BackendType)> {
        let connection_string = self
            .connection_string
            .clone()
            .filter(|cs| !cs.trim().is_empty())
            .context("Connection string is required (use --connection-string or DB_CONNECTION_STRING)")?;

        let backend = match self.provider.as_deref() {
            Some(provider) => provider.parse::<BackendType>()?,
            None => detect_provider(&connection_string)?,
        };

        tracing::info!("Provider: {}", backend);
        tracing::debug!("Connection: {}", mask_connection_string(&connection_string));
        Ok((connection_string, backend))
    }

    /// Build an engine for the resolved target
    pub fn engine(&self) -> Result<MigrationEngine> {
        let (connection_string, backend) = self.resolve()?;
        let engine = MigrationEngine::from_settings(
            backend.identifier(),
            &connection_string,
            self.migrations_path.as_deref(),
            MigrationConfig::default(),
        )?;
        Ok(engine)
    }
}
