//! # strata-migrate: Versioned SQL migrations
//!
//! Discovers `YYYYMMDDHHMM_Description.sql` migration files, applies the pending ones in
//! version order and records them in a ledger table, reverses them through paired down
//! scripts, and reconciles status against what the database says has run.
//!
//! Two backends sit behind the [`MigrationGateway`] trait: PostgreSQL (schema-namespaced,
//! via sqlx) and SQL Server (`GO` batch-separated, via tiberius).

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;
pub mod seeding;

// Re-export core traits and types
pub use backends::{create_gateway, BackendType, MigrationGateway, ScalarValue};
pub use config::MigrationConfig;
pub use error::*;
pub use migrations::*;
pub use seeding::{SeedFile, SeedRunResult, SeedRunner};
