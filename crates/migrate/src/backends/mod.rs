//! Database Backend Abstractions
//!
//! One [`MigrationGateway`] implementation per supported backend. The set is closed:
//! PostgreSQL (schema-namespaced) and SQL Server (batch-separated).

pub mod core;
pub mod postgres;
pub mod sqlserver;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresGateway;
pub use sqlserver::SqlServerGateway;

use crate::config::MigrationConfig;
use crate::error::MigrationError;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    PostgreSQL,
    SqlServer,
}

impl BackendType {
    /// Every supported backend
    pub const ALL: [BackendType; 2] = [BackendType::PostgreSQL, BackendType::SqlServer];

    /// Identifier accepted by [`str::parse`]
    pub fn identifier(&self) -> &'static str {
        match self {
            BackendType::PostgreSQL => "postgresql",
            BackendType::SqlServer => "sqlserver",
        }
    }

    /// Folder holding the bundled migrations for this backend
    pub fn folder_name(&self) -> &'static str {
        self.identifier()
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl std::str::FromStr for BackendType {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendType::ALL
            .into_iter()
            .find(|backend| backend.identifier() == s)
            .ok_or_else(|| {
                MigrationError::configuration(format!(
                    "Unsupported database provider: {} (expected postgresql or sqlserver)",
                    s
                ))
            })
    }
}

/// Build the gateway for a backend
pub fn create_gateway(backend: BackendType, config: &MigrationConfig) -> Arc<dyn MigrationGateway> {
    match backend {
        BackendType::PostgreSQL => Arc::new(PostgresGateway::new(config.clone())),
        BackendType::SqlServer => Arc::new(SqlServerGateway::new(config.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_identifiers_are_exact() {
        assert_eq!("postgresql".parse::<BackendType>().unwrap(), BackendType::PostgreSQL);
        assert_eq!("sqlserver".parse::<BackendType>().unwrap(), BackendType::SqlServer);

        for bad in ["PostgreSQL", "postgres", "mysql", "", " sqlserver"] {
            let err = bad.parse::<BackendType>().unwrap_err();
            assert!(err.is_configuration(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_create_gateway_matches_backend() {
        let config = MigrationConfig::default();
        for backend in BackendType::ALL {
            assert_eq!(create_gateway(backend, &config).backend(), backend);
        }
    }
}
