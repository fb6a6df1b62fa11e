//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the types shared by discovery, the backends and the engine: parsed
//! definitions, ledger rows, derived status entries and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digits in a migration version
pub const VERSION_LEN: usize = 12;

/// Where a definition was discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationOrigin {
    /// Compiled into the binary, identified by resource name
    Bundled(String),
    /// Read from an override directory
    Filesystem(std::path::PathBuf),
}

impl fmt::Display for MigrationOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOrigin::Bundled(name) => write!(f, "bundled:{}", name),
            MigrationOrigin::Filesystem(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A parsed migration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    /// Twelve digit version, e.g. `202401010000`
    pub version: String,
    /// Human-readable description taken from the file name
    pub description: String,
    /// SQL applied on migrate
    pub up_script: String,
    /// SQL applied on rollback; empty when the migration cannot be reversed
    pub down_script: String,
    pub origin: MigrationOrigin,
}

impl MigrationDefinition {
    /// Whether a down script exists
    pub fn is_reversible(&self) -> bool {
        !self.down_script.is_empty()
    }
}

/// A row of the migration ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Merged view of a definition and its ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatusEntry {
    pub version: String,
    pub description: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    /// Ledger row with no discovered definition
    pub orphan: bool,
}

/// Result of running migrations
#[derive(Debug, Default)]
pub struct MigrationRunResult {
    /// Versions applied by this run, in order
    pub applied_migrations: Vec<String>,
    /// Number of definitions that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied_migrations.len()
    }
}

/// Result of rolling back migrations
#[derive(Debug, Default)]
pub struct RollbackResult {
    /// Versions reversed by this run, newest first
    pub rolled_back_migrations: Vec<String>,
    /// Ledger versions skipped because no definition was found
    pub skipped_orphans: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RollbackResult {
    pub fn rolled_back_count(&self) -> usize {
        self.rolled_back_migrations.len()
    }
}

/// Whether `value` has the fixed-width shape ordinal ordering depends on
pub fn is_valid_version(value: &str) -> bool {
    value.len() == VERSION_LEN && value.bytes().all(|b| b.is_ascii_digit())
}
