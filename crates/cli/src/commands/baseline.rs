use anyhow::Result;

use super::ConnectionArgs;

pub async fn run(connection: &ConnectionArgs, version: &str) -> Result<()> {
    let engine = connection.engine()?;
    engine.baseline(version).await?;
    println!("Baseline {} recorded", version);
    Ok(())
}
