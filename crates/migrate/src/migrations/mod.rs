//! Migration System
//!
//! Discovery of migration definitions, the engine that applies them against a
//! [`MigrationGateway`](crate::backends::MigrationGateway), and rollback support.

pub mod bundled;
pub mod definitions;
pub mod rollback;
pub mod runner;
pub mod source;

pub use definitions::*;
pub use rollback::MigrationRollback;
pub use runner::MigrationEngine;
pub use source::{
    create_migration, parse_definition, select_source, split_content, BundledSource,
    DirectorySource, MigrationSource, DOWN_MARKER,
};
