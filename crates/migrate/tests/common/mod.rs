//! Shared fixtures for integration tests: an in-memory gateway that records every call
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use strata_migrate::{
    AppliedMigration, BackendType, DirectorySource, MigrateResult, MigrationConfig,
    MigrationDefinition, MigrationEngine, MigrationError, MigrationGateway, ScalarValue,
};

#[derive(Debug, Default)]
pub struct GatewayState {
    pub database_exists: bool,
    pub ledger_exists: bool,
    pub ledger: BTreeMap<String, AppliedMigration>,
    /// Scripts that ran, in order
    pub executed: Vec<String>,
    /// Operation names, in order
    pub calls: Vec<&'static str>,
    /// Any script containing this text fails
    pub fail_on: Option<String>,
    /// Ledger inserts for this version fail
    pub fail_ledger_for: Option<String>,
}

/// Gateway keeping the database, ledger and executed scripts in memory
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<GatewayState>,
}

impl MockGateway {
    /// A server where the target database does not exist yet
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A database with an empty ledger
    pub fn with_ledger() -> Arc<Self> {
        let gateway = Self::default();
        {
            let mut state = gateway.state();
            state.database_exists = true;
            state.ledger_exists = true;
        }
        Arc::new(gateway)
    }

    pub fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap()
    }

    pub fn fail_on(&self, needle: &str) {
        self.state().fail_on = Some(needle.to_string());
    }

    pub fn fail_ledger_write(&self, version: &str) {
        self.state().fail_ledger_for = Some(version.to_string());
    }

    pub fn record(&self, version: &str, description: &str) {
        self.state().ledger.insert(
            version.to_string(),
            AppliedMigration {
                version: version.to_string(),
                description: description.to_string(),
                applied_at: Utc::now(),
            },
        );
    }

    pub fn ledger_versions(&self) -> Vec<String> {
        self.state().ledger.keys().cloned().collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    fn run(state: &mut GatewayState, script: &str) -> MigrateResult<()> {
        if let Some(needle) = &state.fail_on {
            if script.contains(needle.as_str()) {
                return Err(MigrationError::Execution(format!("syntax error near '{}'", needle)));
            }
        }
        state.executed.push(script.to_string());
        Ok(())
    }

    fn insert(state: &mut GatewayState, version: &str, description: &str) -> MigrateResult<()> {
        if state.fail_ledger_for.as_deref() == Some(version) {
            return Err(MigrationError::Execution(format!(
                "could not write ledger row for {}",
                version
            )));
        }
        if state.ledger.contains_key(version) {
            return Err(MigrationError::Execution(format!(
                "duplicate key value violates unique constraint: {}",
                version
            )));
        }
        state.ledger.insert(
            version.to_string(),
            AppliedMigration {
                version: version.to_string(),
                description: description.to_string(),
                applied_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl MigrationGateway for MockGateway {
    fn backend(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    async fn database_exists(&self, _descriptor: &str) -> MigrateResult<bool> {
        let mut state = self.state();
        state.calls.push("database_exists");
        Ok(state.database_exists)
    }

    async fn create_database(&self, _descriptor: &str) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("create_database");
        state.database_exists = true;
        Ok(())
    }

    async fn ledger_exists(&self, _descriptor: &str) -> MigrateResult<bool> {
        let mut state = self.state();
        state.calls.push("ledger_exists");
        if !state.database_exists {
            return Err(MigrationError::Execution("database does not exist".to_string()));
        }
        Ok(state.ledger_exists)
    }

    async fn create_ledger(&self, _descriptor: &str) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("create_ledger");
        state.ledger_exists = true;
        Ok(())
    }

    async fn read_ledger(&self, _descriptor: &str) -> MigrateResult<Vec<AppliedMigration>> {
        let mut state = self.state();
        state.calls.push("read_ledger");
        Ok(state.ledger.values().cloned().collect())
    }

    async fn append_ledger_row(
        &self,
        _descriptor: &str,
        version: &str,
        description: &str,
    ) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("append_ledger_row");
        Self::insert(&mut state, version, description)
    }

    async fn remove_ledger_row(&self, _descriptor: &str, version: &str) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("remove_ledger_row");
        state.ledger.remove(version);
        Ok(())
    }

    async fn execute_script(&self, _descriptor: &str, script: &str) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("execute_script");
        Self::run(&mut state, script)
    }

    async fn execute_scalar(&self, _descriptor: &str, _query: &str) -> MigrateResult<ScalarValue> {
        let mut state = self.state();
        state.calls.push("execute_scalar");
        Ok(ScalarValue::Int(state.ledger.len() as i64))
    }

    async fn apply_migration(
        &self,
        _descriptor: &str,
        migration: &MigrationDefinition,
    ) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("apply_migration");
        Self::run(&mut state, &migration.up_script)?;
        if let Err(e) = Self::insert(&mut state, &migration.version, &migration.description) {
            // Transaction rolled back: the script never happened
            state.executed.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn revert_migration(
        &self,
        _descriptor: &str,
        version: &str,
        down_script: &str,
    ) -> MigrateResult<()> {
        let mut state = self.state();
        state.calls.push("revert_migration");
        Self::run(&mut state, down_script)?;
        state.ledger.remove(version);
        Ok(())
    }
}

/// Engine reading definitions from `dir` through `gateway`
pub fn engine(gateway: &Arc<MockGateway>, dir: &Path) -> MigrationEngine {
    let gateway: Arc<dyn MigrationGateway> = gateway.clone();
    MigrationEngine::new(
        gateway,
        Box::new(DirectorySource::new(dir)),
        "postgres://localhost/strata_test",
        MigrationConfig::default(),
    )
}

/// Write a migration file with optional down section
pub fn write_migration(dir: &Path, file_name: &str, up: &str, down: Option<&str>) {
    let content = match down {
        Some(down) => format!("{}\n\n-- DOWN\n{}\n", up, down),
        None => format!("{}\n", up),
    };
    fs::write(dir.join(file_name), content).unwrap();
}
