use anyhow::Result;
use std::path::Path;
use strata_migrate::{create_gateway, MigrationConfig, SeedRunner};

use super::ConnectionArgs;

pub async fn run(connection: &ConnectionArgs, seeds_path: &Path) -> Result<()> {
    let (connection_string, backend) = connection.resolve()?;
    let gateway = create_gateway(backend, &MigrationConfig::default());

    tracing::info!("Running seeds from {}", seeds_path.display());
    let result = SeedRunner::new(gateway, connection_string).run(seeds_path).await?;

    println!(
        "Executed {} seed(s) ({} ms)",
        result.executed.len(),
        result.execution_time_ms
    );
    for name in &result.executed {
        println!("  * {}", name);
    }
    Ok(())
}
