use anyhow::Result;
use std::path::Path;

pub fn create(migrations_path: &Path, name: &str) -> Result<()> {
    let file_name = strata_migrate::create_migration(migrations_path, name)?;
    println!("Created migration: {}", migrations_path.join(file_name).display());
    Ok(())
}
