//! Core Gateway Traits
//!
//! This module defines the contract every backend exposes to the migration engine:
//! existence checks, ledger table management, ledger reads and writes, and raw script
//! execution. The descriptor passed to each operation is the opaque connection string
//! of the target database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::backends::BackendType;
use crate::error::{MigrateResult, MigrationError};
use crate::migrations::definitions::{AppliedMigration, MigrationDefinition};

/// Backend adapter used by the migration engine.
///
/// Callers check existence before calling the creation operations; implementations need
/// not guard against redundant creation calls. Each call opens its own connection and
/// releases it before returning.
#[async_trait]
pub trait MigrationGateway: Send + Sync {
    /// Backend this gateway talks to
    fn backend(&self) -> BackendType;

    /// Whether the target database exists, checked from the administrative database
    async fn database_exists(&self, descriptor: &str) -> MigrateResult<bool>;

    /// Create the target database
    async fn create_database(&self, descriptor: &str) -> MigrateResult<()>;

    /// Whether the ledger table exists in the active schema
    async fn ledger_exists(&self, descriptor: &str) -> MigrateResult<bool>;

    /// Create the ledger table in the active schema
    async fn create_ledger(&self, descriptor: &str) -> MigrateResult<()>;

    /// All ledger rows ordered by version ascending
    async fn read_ledger(&self, descriptor: &str) -> MigrateResult<Vec<AppliedMigration>>;

    /// Insert a ledger row stamped with the current UTC time
    async fn append_ledger_row(
        &self,
        descriptor: &str,
        version: &str,
        description: &str,
    ) -> MigrateResult<()>;

    /// Delete a ledger row; absent rows are not an error
    async fn remove_ledger_row(&self, descriptor: &str, version: &str) -> MigrateResult<()>;

    /// Run a script against the target database
    async fn execute_script(&self, descriptor: &str, script: &str) -> MigrateResult<()>;

    /// Read a single value
    async fn execute_scalar(&self, descriptor: &str, query: &str) -> MigrateResult<ScalarValue>;

    /// Run the up script and append the ledger row as one transaction
    async fn apply_migration(
        &self,
        descriptor: &str,
        migration: &MigrationDefinition,
    ) -> MigrateResult<()>;

    /// Run a down script and remove the ledger row as one transaction
    async fn revert_migration(
        &self,
        descriptor: &str,
        version: &str,
        down_script: &str,
    ) -> MigrateResult<()>;
}

/// Single value returned by [`MigrationGateway::execute_scalar`]
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl ScalarValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(i) => Some(*i),
            ScalarValue::Bool(b) => Some(i64::from(*b)),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            ScalarValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Text(s) => write!(f, "{}", s),
            ScalarValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<Option<ScalarValue>> for ScalarValue {
    fn from(value: Option<ScalarValue>) -> Self {
        value.unwrap_or(ScalarValue::Null)
    }
}

/// Run `operation` under the fixed execution timeout
pub(crate) async fn with_timeout<T, F>(timeout: Duration, operation: F) -> MigrateResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(MigrationError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(ScalarValue::Int(3).as_i64(), Some(3));
        assert_eq!(ScalarValue::Text(" 42 ".to_string()).as_i64(), Some(42));
        assert_eq!(ScalarValue::Int(0).as_bool(), Some(false));
        assert_eq!(ScalarValue::Text("x".to_string()).as_str(), Some("x"));
        assert!(ScalarValue::from(None).is_null());
        assert_eq!(ScalarValue::Null.to_string(), "NULL");
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let result: MigrateResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(MigrationError::Timeout(_))));

        let result = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
