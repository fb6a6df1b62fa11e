//! Migration Runner - Executes migrations against the database
//!
//! Handles ensuring the target database and ledger exist, computing the pending set,
//! applying it in version order, baselining and reconciling status.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::definitions::{
    is_valid_version, AppliedMigration, MigrationDefinition, MigrationRunResult,
    MigrationStatusEntry, VERSION_LEN,
};
use super::source::{select_source, MigrationSource};
use crate::backends::{create_gateway, BackendType, MigrationGateway};
use crate::config::MigrationConfig;
use crate::error::{MigrateResult, MigrationError};

/// Migration engine bound to one backend, one target database and one definition source
pub struct MigrationEngine {
    gateway: Arc<dyn MigrationGateway>,
    source: Box<dyn MigrationSource>,
    descriptor: String,
    config: MigrationConfig,
}

impl MigrationEngine {
    /// Create a new engine from its parts
    pub fn new(
        gateway: Arc<dyn MigrationGateway>,
        source: Box<dyn MigrationSource>,
        descriptor: impl Into<String>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            gateway,
            source,
            descriptor: descriptor.into(),
            config,
        }
    }

    /// Create an engine from a provider identifier, a connection descriptor and an
    /// optional override directory
    pub fn from_settings(
        provider: &str,
        descriptor: &str,
        migrations_dir: Option<&Path>,
        config: MigrationConfig,
    ) -> MigrateResult<Self> {
        let backend: BackendType = provider.parse()?;
        if descriptor.trim().is_empty() {
            return Err(MigrationError::configuration("Connection string must not be empty"));
        }

        let gateway = create_gateway(backend, &config);
        let source = select_source(backend, migrations_dir);
        Ok(Self::new(gateway, source, descriptor, config))
    }

    /// Get the gateway
    pub fn gateway(&self) -> &Arc<dyn MigrationGateway> {
        &self.gateway
    }

    /// Get the connection descriptor
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Human-readable location of the definition source
    pub fn source_location(&self) -> String {
        self.source.location()
    }

    /// Load definitions from the configured source
    pub fn load_definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        self.source.load()
    }

    /// Apply every pending migration, optionally only those up to `target_version`
    pub async fn migrate(&self, target_version: Option<&str>) -> MigrateResult<MigrationRunResult> {
        let target = optional_version(target_version)?;
        let start_time = Instant::now();

        self.ensure_ledger().await?;

        let definitions = self.load_definitions()?;
        let applied = self.gateway.read_ledger(&self.descriptor).await?;
        let applied_versions: HashSet<&str> = applied.iter().map(|m| m.version.as_str()).collect();

        let skipped_count = definitions
            .iter()
            .filter(|d| applied_versions.contains(d.version.as_str()))
            .count();
        let pending = select_pending(&definitions, &applied_versions, target);

        if pending.is_empty() {
            tracing::info!("Database is up to date, no migrations to apply");
        }

        let mut applied_migrations = Vec::with_capacity(pending.len());
        for migration in pending {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.description
            );

            self.gateway
                .apply_migration(&self.descriptor, migration)
                .await
                .map_err(|e| MigrationError::Apply {
                    version: migration.version.clone(),
                    message: e.to_string(),
                })?;

            tracing::info!("Migration {} applied successfully", migration.version);
            applied_migrations.push(migration.version.clone());
        }

        Ok(MigrationRunResult {
            applied_migrations,
            skipped_count,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Definitions `migrate` would apply, without touching the database.
    ///
    /// A missing database or ledger means every definition is pending.
    pub async fn pending(&self, target_version: Option<&str>) -> MigrateResult<Vec<MigrationDefinition>> {
        let target = optional_version(target_version)?;

        let definitions = self.load_definitions()?;
        let applied = self.applied_if_present().await?;
        let applied_versions: HashSet<&str> = applied.iter().map(|m| m.version.as_str()).collect();

        Ok(select_pending(&definitions, &applied_versions, target)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Record `version` as applied without running any script
    pub async fn baseline(&self, version: &str) -> MigrateResult<()> {
        required_version(version, "Baseline")?;

        self.ensure_ledger().await?;
        self.gateway
            .append_ledger_row(&self.descriptor, version, &self.config.baseline_description)
            .await?;

        tracing::info!("Baseline migration {} created", version);
        Ok(())
    }

    /// Merge discovered definitions with the ledger, including orphaned rows
    pub async fn status(&self) -> MigrateResult<Vec<MigrationStatusEntry>> {
        let definitions = self.load_definitions()?;
        let applied = self.applied_if_present().await?;

        let by_version: HashMap<&str, &AppliedMigration> =
            applied.iter().map(|m| (m.version.as_str(), m)).collect();
        let defined: HashSet<&str> = definitions.iter().map(|d| d.version.as_str()).collect();

        let mut entries: Vec<MigrationStatusEntry> = definitions
            .iter()
            .map(|definition| {
                let record = by_version.get(definition.version.as_str());
                MigrationStatusEntry {
                    version: definition.version.clone(),
                    description: definition.description.clone(),
                    applied: record.is_some(),
                    applied_at: record.map(|r| r.applied_at),
                    orphan: false,
                }
            })
            .collect();

        for record in applied.iter().filter(|m| !defined.contains(m.version.as_str())) {
            entries.push(MigrationStatusEntry {
                version: record.version.clone(),
                description: self.config.orphan_description(&record.description),
                applied: true,
                applied_at: Some(record.applied_at),
                orphan: true,
            });
        }

        entries.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(entries)
    }

    /// Create the target database and the ledger table when missing
    pub(crate) async fn ensure_ledger(&self) -> MigrateResult<()> {
        if !self.gateway.database_exists(&self.descriptor).await? {
            tracing::info!("Target database does not exist, creating it");
            self.gateway.create_database(&self.descriptor).await?;
        }

        if !self.gateway.ledger_exists(&self.descriptor).await? {
            tracing::info!("Creating migration ledger table {}", self.config.ledger_table);
            self.gateway.create_ledger(&self.descriptor).await?;
        }

        Ok(())
    }

    /// Ledger rows, or nothing when the database or ledger does not exist yet
    pub(crate) async fn applied_if_present(&self) -> MigrateResult<Vec<AppliedMigration>> {
        if !self.gateway.database_exists(&self.descriptor).await? {
            return Ok(Vec::new());
        }
        if !self.gateway.ledger_exists(&self.descriptor).await? {
            return Ok(Vec::new());
        }
        self.gateway.read_ledger(&self.descriptor).await
    }
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("backend", &self.gateway.backend())
            .field("source", &self.source.location())
            .field("config", &self.config)
            .finish()
    }
}

/// Definitions not yet applied, restricted to `<= target` when given, ascending
fn select_pending<'a>(
    definitions: &'a [MigrationDefinition],
    applied_versions: &HashSet<&str>,
    target: Option<&str>,
) -> Vec<&'a MigrationDefinition> {
    let mut pending: Vec<&MigrationDefinition> = definitions
        .iter()
        .filter(|d| !applied_versions.contains(d.version.as_str()))
        .filter(|d| target.map_or(true, |t| d.version.as_str() <= t))
        .collect();
    pending.sort_by(|a, b| a.version.cmp(&b.version));
    pending
}

/// An absent or empty optional version means "no restriction"
pub(crate) fn optional_version(version: Option<&str>) -> MigrateResult<Option<&str>> {
    match version.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            check_version_shape(v)?;
            Ok(Some(v))
        }
    }
}

pub(crate) fn required_version(version: &str, operation: &str) -> MigrateResult<()> {
    if version.trim().is_empty() {
        return Err(MigrationError::configuration(format!(
            "{} requires a target version",
            operation
        )));
    }
    check_version_shape(version)
}

fn check_version_shape(version: &str) -> MigrateResult<()> {
    if is_valid_version(version) {
        Ok(())
    } else {
        Err(MigrationError::configuration(format!(
            "Invalid migration version '{}': expected {} digits (YYYYMMDDHHMM)",
            version, VERSION_LEN
        )))
    }
}
