use anyhow::Result;
use strata_migrate::MigrationRollback;

use super::ConnectionArgs;

pub async fn run(connection: &ConnectionArgs, target_version: &str) -> Result<()> {
    let engine = connection.engine()?;

    tracing::info!("Rolling back to version {}", target_version);
    let result = engine.rollback(target_version).await?;

    println!(
        "Rolled back {} migration(s) ({} ms)",
        result.rolled_back_count(),
        result.execution_time_ms
    );
    for version in &result.rolled_back_migrations {
        println!("  - {}", version);
    }
    if !result.skipped_orphans.is_empty() {
        println!(
            "Skipped {} version(s) with no migration file: {}",
            result.skipped_orphans.len(),
            result.skipped_orphans.join(", ")
        );
    }
    Ok(())
}
