//! Database seeding
//!
//! Runs ordered `*.sql` seed scripts from a directory against an existing database.
//! Seed files are named `NNN_Name.sql`; the numeric prefix gives the execution order.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::backends::MigrationGateway;
use crate::error::{MigrateResult, MigrationError};
use crate::migrations::source::has_sql_extension;

static SEED_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_(.+)$").expect("valid seed file name pattern"));

/// A seed script discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFile {
    pub order: u32,
    pub name: String,
    pub script: String,
    pub path: PathBuf,
}

impl SeedFile {
    /// Parse a seed file from its base name and content; `None` for blank scripts
    pub fn parse(file_stem: &str, content: &str, path: PathBuf) -> Option<Self> {
        if content.trim().is_empty() {
            tracing::warn!("Seed file is empty: {}", file_stem);
            return None;
        }

        let (order, name) = match SEED_NAME_PATTERN.captures(file_stem) {
            // Prefixes too large for u32 keep the name but sort first
            Some(captures) => (
                captures[1].parse().unwrap_or(0),
                captures[2].replace('_', " "),
            ),
            None => (0, file_stem.to_string()),
        };

        Some(Self {
            order,
            name,
            script: content.to_string(),
            path,
        })
    }
}

/// Result of a seed run
#[derive(Debug, Default)]
pub struct SeedRunResult {
    /// Seed names in execution order
    pub executed: Vec<String>,
    pub execution_time_ms: u128,
}

/// Executes seed scripts through a gateway
pub struct SeedRunner {
    gateway: Arc<dyn MigrationGateway>,
    descriptor: String,
}

impl SeedRunner {
    pub fn new(gateway: Arc<dyn MigrationGateway>, descriptor: impl Into<String>) -> Self {
        Self {
            gateway,
            descriptor: descriptor.into(),
        }
    }

    /// Run every seed in `seeds_dir`, ordered by `(order, name)`
    pub async fn run(&self, seeds_dir: &Path) -> MigrateResult<SeedRunResult> {
        let start_time = Instant::now();

        if !self.gateway.database_exists(&self.descriptor).await? {
            return Err(MigrationError::configuration(
                "Database does not exist. Run migrations first.",
            ));
        }

        let seeds = discover_seeds(seeds_dir)?;
        if seeds.is_empty() {
            tracing::info!("No seed files found in {}", seeds_dir.display());
        }

        let mut result = SeedRunResult::default();
        for seed in seeds {
            tracing::info!("Executing seed: {}", seed.name);

            if let Err(e) = self.gateway.execute_script(&self.descriptor, &seed.script).await {
                tracing::error!("Failed to execute seed {}: {}", seed.name, e);
                return Err(MigrationError::Seed {
                    name: seed.name,
                    message: e.to_string(),
                });
            }

            tracing::info!("Seed {} executed successfully", seed.name);
            result.executed.push(seed.name);
        }

        result.execution_time_ms = start_time.elapsed().as_millis();
        Ok(result)
    }
}

/// Top-level seed files of `dir`, sorted for execution. A missing directory yields none.
pub fn discover_seeds(dir: &Path) -> MigrateResult<Vec<SeedFile>> {
    if !dir.is_dir() {
        tracing::warn!("Seeds directory does not exist: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut seeds = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !has_sql_extension(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            tracing::warn!("Skipping seed file with non UTF-8 name: {}", path.display());
            continue;
        };

        let content = fs::read_to_string(&path)?;
        if let Some(seed) = SeedFile::parse(&stem, &content, path) {
            seeds.push(seed);
        }
    }

    seeds.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_seed_names() {
        let seed = SeedFile::parse("002_Reference_Data", "INSERT 1;", PathBuf::from("a")).unwrap();
        assert_eq!(seed.order, 2);
        assert_eq!(seed.name, "Reference Data");

        let seed = SeedFile::parse("users", "INSERT 1;", PathBuf::from("b")).unwrap();
        assert_eq!(seed.order, 0);
        assert_eq!(seed.name, "users");

        assert!(SeedFile::parse("001_blank", " \n\t", PathBuf::from("c")).is_none());
    }

    #[test]
    fn test_discover_seeds_orders_by_prefix_then_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("010_Late.sql"), "SELECT 10;").unwrap();
        fs::write(dir.path().join("002_Beta.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("002_Alpha.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("plain.SQL"), "SELECT 0;").unwrap();
        fs::write(dir.path().join("003_Empty.sql"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let names: Vec<_> = discover_seeds(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["plain", "Alpha", "Beta", "Late"]);
    }

    #[test]
    fn test_missing_seed_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(discover_seeds(&dir.path().join("nope")).unwrap().is_empty());
    }
}
