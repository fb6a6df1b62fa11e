//! Migration Rollback - Handles rolling back applied migrations
//!
//! Reverses ledger rows at or above a target version, newest first, by running the
//! down script of the matching definition.

use std::time::Instant;

use super::definitions::RollbackResult;
use super::runner::{required_version, MigrationEngine};
use crate::error::{MigrateResult, MigrationError};

/// Extension trait for MigrationEngine to add rollback functionality
#[allow(async_fn_in_trait)]
pub trait MigrationRollback {
    /// Roll back every applied migration whose version is `>= target_version`.
    ///
    /// Ledger rows without a discovered definition are skipped with a warning. A matched
    /// definition without a down script aborts the run; reversals already done stay done.
    async fn rollback(&self, target_version: &str) -> MigrateResult<RollbackResult>;
}

impl MigrationRollback for MigrationEngine {
    async fn rollback(&self, target_version: &str) -> MigrateResult<RollbackResult> {
        required_version(target_version, "Rollback")?;
        let start_time = Instant::now();

        let gateway = self.gateway();
        let descriptor = self.descriptor();

        if !gateway.database_exists(descriptor).await? || !gateway.ledger_exists(descriptor).await? {
            return Err(MigrationError::LedgerMissing);
        }

        let definitions = self.load_definitions()?;
        let mut candidates: Vec<_> = gateway
            .read_ledger(descriptor)
            .await?
            .into_iter()
            .filter(|m| m.version.as_str() >= target_version)
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version));

        let mut result = RollbackResult::default();

        for applied in candidates {
            let Some(definition) = definitions.iter().find(|d| d.version == applied.version) else {
                tracing::warn!(
                    "Migration file not found for version {}, skipping rollback",
                    applied.version
                );
                result.skipped_orphans.push(applied.version);
                continue;
            };

            if !definition.is_reversible() {
                return Err(MigrationError::MissingDownScript {
                    version: applied.version,
                });
            }

            tracing::info!(
                "Rolling back migration {}: {}",
                applied.version,
                applied.description
            );
            gateway
                .revert_migration(descriptor, &applied.version, &definition.down_script)
                .await?;
            tracing::info!("Migration {} rolled back successfully", applied.version);

            result.rolled_back_migrations.push(applied.version);
        }

        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }
}
