use anyhow::Result;

use super::ConnectionArgs;

pub async fn run(connection: &ConnectionArgs, target_version: Option<&str>, dry_run: bool) -> Result<()> {
    let engine = connection.engine()?;

    if let Some(target) = target_version {
        tracing::info!("Target version: {}", target);
    }

    if dry_run {
        let pending = engine.pending(target_version).await?;
        if pending.is_empty() {
            println!("Database is up to date");
        } else {
            println!("Pending migrations ({}):", pending.len());
            for migration in &pending {
                println!("  {}  {}", migration.version, migration.description);
            }
        }
        return Ok(());
    }

    tracing::info!("Starting database migration...");
    let result = engine.migrate(target_version).await?;

    println!(
        "Applied {} migration(s), {} already applied ({} ms)",
        result.applied_count(),
        result.skipped_count,
        result.execution_time_ms
    );
    for version in &result.applied_migrations {
        println!("  + {}", version);
    }
    Ok(())
}
