//! SQL Server Backend Implementation
//!
//! Batch-separated gateway built on tiberius. The descriptor is an ADO-style
//! `key=value;` connection string. Scripts are split on lines consisting only of `GO`
//! and the batches run one after another on a single connection.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use tiberius::{Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::core::*;
use crate::backends::BackendType;
use crate::config::{defaults, MigrationConfig};
use crate::error::{MigrateResult, MigrationError};
use crate::migrations::definitions::{AppliedMigration, MigrationDefinition};

/// Line-oriented batch separator
pub const BATCH_SEPARATOR: &str = "GO";

/// Keys naming the target database in an ADO connection string
const DATABASE_KEYS: [&str; 2] = ["database", "initial catalog"];

type SqlClient = Client<Compat<TcpStream>>;

/// SQL Server migration gateway
#[derive(Debug, Clone)]
pub struct SqlServerGateway {
    config: MigrationConfig,
}

/// ADO connection string kept as ordered `key=value` pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoConnectionString {
    pairs: Vec<(String, String)>,
}

impl AdoConnectionString {
    /// Parse `key=value;` pairs. Values wrapped in `{}` or quotes may contain `;`.
    pub fn parse(descriptor: &str) -> MigrateResult<Self> {
        let mut pairs = Vec::new();
        let mut rest = descriptor;

        loop {
            rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
            if rest.is_empty() {
                break;
            }

            let Some(eq) = rest.find('=') else {
                return Err(MigrationError::configuration(format!(
                    "Invalid SQL Server connection string segment: {}",
                    rest
                )));
            };
            let key = rest[..eq].trim().to_string();
            if key.is_empty() {
                return Err(MigrationError::configuration(
                    "Empty key in SQL Server connection string",
                ));
            }
            rest = rest[eq + 1..].trim_start();

            let value_len = quoted_value_len(rest).unwrap_or_else(|| rest.find(';').unwrap_or(rest.len()));
            pairs.push((key, rest[..value_len].trim().to_string()));
            rest = &rest[value_len..];
        }

        Ok(Self { pairs })
    }

    /// Value of a key, compared case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value among `keys`, with wrapping braces or quotes removed
    pub fn value(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.get(key))
            .map(unwrap_value)
            .filter(|value| !value.is_empty())
    }

    /// Target database name
    pub fn database(&self) -> Option<String> {
        self.value(&DATABASE_KEYS)
    }

    /// Same connection string pointed at another database
    pub fn with_database(&self, database: &str) -> Self {
        let mut pairs: Vec<(String, String)> = self
            .pairs
            .iter()
            .filter(|(k, _)| !DATABASE_KEYS.iter().any(|d| k.eq_ignore_ascii_case(d)))
            .cloned()
            .collect();
        pairs.push(("Database".to_string(), database.to_string()));
        Self { pairs }
    }
}

impl fmt::Display for AdoConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.pairs {
            write!(f, "{}={};", key, value)?;
        }
        Ok(())
    }
}

/// Length of a `{...}`, `"..."` or `'...'` value at the start of `input`
fn quoted_value_len(input: &str) -> Option<usize> {
    let close = match input.chars().next()? {
        '{' => '}',
        '"' => '"',
        '\'' => '\'',
        _ => return None,
    };
    input[1..].find(close).map(|end| end + 2)
}

fn unwrap_value(value: &str) -> String {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
        .or_else(|| trimmed.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(trimmed);
    inner.to_string()
}

/// Quote an identifier for SQL Server
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Split a script into batches on lines holding only the batch separator
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        if line.trim().eq_ignore_ascii_case(BATCH_SEPARATOR) {
            push_batch(&mut batches, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current);

    batches
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        batches.push(trimmed.to_string());
    }
    current.clear();
}

impl SqlServerGateway {
    /// Create a new SQL Server gateway
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    fn ledger_table(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.config.sqlserver_schema),
            quote_identifier(&self.config.ledger_table)
        )
    }

    fn target_database(descriptor: &AdoConnectionString) -> MigrateResult<String> {
        descriptor.database().ok_or_else(|| {
            MigrationError::configuration(
                "SQL Server connection string must name a Database or Initial Catalog",
            )
        })
    }

    async fn connect(connection_string: &str) -> MigrateResult<SqlClient> {
        let config = Config::from_ado_string(connection_string)?;
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let client = match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => client,
            // Azure SQL may redirect the connection to another node
            Err(tiberius::error::Error::Routing { host, port }) => {
                let mut config = config;
                config.host(&host);
                config.port(port);
                let tcp = TcpStream::connect(config.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Client::connect(config, tcp.compat_write()).await?
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("SQL Server connection opened");
        Ok(client)
    }

    async fn run_batches(client: &mut SqlClient, script: &str) -> MigrateResult<()> {
        for batch in split_batches(script) {
            client.simple_query(batch).await?.into_results().await?;
        }
        Ok(())
    }

    async fn begin(client: &mut SqlClient) -> MigrateResult<()> {
        client.simple_query("BEGIN TRANSACTION").await?.into_results().await?;
        Ok(())
    }

    async fn commit(client: &mut SqlClient) -> MigrateResult<()> {
        client.simple_query("COMMIT TRANSACTION").await?.into_results().await?;
        Ok(())
    }

    async fn rollback(client: &mut SqlClient) {
        let result = match client.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
            Ok(stream) => stream.into_results().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to roll back SQL Server transaction: {}", e);
        }
    }
}

#[async_trait]
impl MigrationGateway for SqlServerGateway {
    fn backend(&self) -> BackendType {
        BackendType::SqlServer
    }

    async fn database_exists(&self, descriptor: &str) -> MigrateResult<bool> {
        let ado = AdoConnectionString::parse(descriptor)?;
        let database = Self::target_database(&ado)?;
        let admin = ado.with_database(defaults::SQLSERVER_ADMIN_DATABASE).to_string();

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(&admin).await?;
            let row = client
                .query("SELECT COUNT(*) FROM sys.databases WHERE name = @P1", &[&database])
                .await?
                .into_row()
                .await?;
            let count = row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0);
            Ok(count > 0)
        })
        .await
    }

    async fn create_database(&self, descriptor: &str) -> MigrateResult<()> {
        let ado = AdoConnectionString::parse(descriptor)?;
        let database = Self::target_database(&ado)?;
        let admin = ado.with_database(defaults::SQLSERVER_ADMIN_DATABASE).to_string();

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(&admin).await?;
            let sql = format!("CREATE DATABASE {}", quote_identifier(&database));
            client.simple_query(sql).await?.into_results().await?;
            tracing::info!("Database {} created successfully", database);
            Ok(())
        })
        .await
    }

    async fn ledger_exists(&self, descriptor: &str) -> MigrateResult<bool> {
        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            let row = client
                .query(
                    "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES \
                     WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2",
                    &[&self.config.sqlserver_schema, &self.config.ledger_table],
                )
                .await?
                .into_row()
                .await?;
            let count = row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0);
            Ok(count > 0)
        })
        .await
    }

    async fn create_ledger(&self, descriptor: &str) -> MigrateResult<()> {
        let schema = &self.config.sqlserver_schema;
        let sql = format!(
            "IF SCHEMA_ID(N'{schema_literal}') IS NULL EXEC('CREATE SCHEMA {schema_ident}');\n\
             CREATE TABLE {table} (\n    \
                 version NVARCHAR(50) NOT NULL PRIMARY KEY,\n    \
                 description NVARCHAR(500) NOT NULL,\n    \
                 applied_at DATETIME2 NOT NULL\n\
             );",
            schema_literal = schema.replace('\'', "''"),
            schema_ident = quote_identifier(schema).replace('\'', "''"),
            table = self.ledger_table()
        );

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            client.simple_query(sql).await?.into_results().await?;
            tracing::info!("Migration ledger created in schema {}", schema);
            Ok(())
        })
        .await
    }

    async fn read_ledger(&self, descriptor: &str) -> MigrateResult<Vec<AppliedMigration>> {
        let sql = format!(
            "SELECT version, description, applied_at FROM {} ORDER BY version",
            self.ledger_table()
        );

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            let rows = client.query(sql, &[]).await?.into_first_result().await?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(ledger_row(&row)?);
            }
            Ok(records)
        })
        .await
    }

    async fn append_ledger_row(
        &self,
        descriptor: &str,
        version: &str,
        description: &str,
    ) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (version, description, applied_at) VALUES (@P1, @P2, @P3)",
            self.ledger_table()
        );
        let version = version.to_string();
        let description = description.to_string();

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            let applied_at = Utc::now().naive_utc();
            client.execute(sql, &[&version, &description, &applied_at]).await?;
            Ok(())
        })
        .await
    }

    async fn remove_ledger_row(&self, descriptor: &str, version: &str) -> MigrateResult<()> {
        let sql = format!("DELETE FROM {} WHERE version = @P1", self.ledger_table());
        let version = version.to_string();

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            client.execute(sql, &[&version]).await?;
            Ok(())
        })
        .await
    }

    async fn execute_script(&self, descriptor: &str, script: &str) -> MigrateResult<()> {
        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            Self::run_batches(&mut client, script).await
        })
        .await
    }

    async fn execute_scalar(&self, descriptor: &str, query: &str) -> MigrateResult<ScalarValue> {
        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            let row = client.simple_query(query).await?.into_row().await?;
            Ok(row.map(|r| first_column_value(&r)).into())
        })
        .await
    }

    async fn apply_migration(
        &self,
        descriptor: &str,
        migration: &MigrationDefinition,
    ) -> MigrateResult<()> {
        let insert = format!(
            "INSERT INTO {} (version, description, applied_at) VALUES (@P1, @P2, @P3)",
            self.ledger_table()
        );

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            Self::begin(&mut client).await?;

            let outcome: MigrateResult<()> = async {
                Self::run_batches(&mut client, &migration.up_script).await?;
                let applied_at = Utc::now().naive_utc();
                client
                    .execute(
                        insert.as_str(),
                        &[&migration.version, &migration.description, &applied_at],
                    )
                    .await?;
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => Self::commit(&mut client).await,
                Err(e) => {
                    Self::rollback(&mut client).await;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn revert_migration(
        &self,
        descriptor: &str,
        version: &str,
        down_script: &str,
    ) -> MigrateResult<()> {
        let delete = format!("DELETE FROM {} WHERE version = @P1", self.ledger_table());
        let version = version.to_string();

        with_timeout(self.config.execution_timeout, async {
            let mut client = Self::connect(descriptor).await?;
            Self::begin(&mut client).await?;

            let outcome: MigrateResult<()> = async {
                Self::run_batches(&mut client, down_script).await?;
                client.execute(delete.as_str(), &[&version]).await?;
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => Self::commit(&mut client).await,
                Err(e) => {
                    Self::rollback(&mut client).await;
                    Err(e)
                }
            }
        })
        .await
    }
}

fn ledger_row(row: &Row) -> MigrateResult<AppliedMigration> {
    let missing = |column: &str| MigrationError::Execution(format!("Ledger column {} is NULL", column));

    let version: &str = row.try_get("version")?.ok_or_else(|| missing("version"))?;
    let description: &str = row.try_get("description")?.ok_or_else(|| missing("description"))?;
    let applied_at: NaiveDateTime = row.try_get("applied_at")?.ok_or_else(|| missing("applied_at"))?;

    Ok(AppliedMigration {
        version: version.to_string(),
        description: description.to_string(),
        applied_at: DateTime::from_naive_utc_and_offset(applied_at, Utc),
    })
}

/// Convert the first column of a row into a [`ScalarValue`]
fn first_column_value(row: &Row) -> ScalarValue {
    if row.len() == 0 {
        return ScalarValue::Null;
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(0) {
        return ScalarValue::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(0) {
        return ScalarValue::Int(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(0) {
        return ScalarValue::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(0) {
        return ScalarValue::Int(i64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(0) {
        return ScalarValue::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(0) {
        return ScalarValue::Float(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(0) {
        return ScalarValue::Float(f64::from(v));
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(0) {
        return ScalarValue::Text(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDateTime, _>(0) {
        return ScalarValue::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc));
    }
    if let Ok(Some(v)) = row.try_get::<DateTime<Utc>, _>(0) {
        return ScalarValue::Timestamp(v);
    }
    ScalarValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_batches_on_go_lines() {
        let script = "CREATE TABLE a (id INT);\nGO\nCREATE INDEX ix ON a (id);\r\ngo\r\n\nGO\nINSERT INTO a VALUES (1);";
        assert_eq!(
            split_batches(script),
            vec![
                "CREATE TABLE a (id INT);",
                "CREATE INDEX ix ON a (id);",
                "INSERT INTO a VALUES (1);",
            ]
        );
    }

    #[test]
    fn test_split_batches_ignores_go_inside_lines() {
        let script = "SELECT 'GO' AS word;\nEXEC sp_go;\n  GO  \nSELECT 2;";
        let batches = split_batches(script);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], "SELECT 'GO' AS word;\nEXEC sp_go;");
    }

    #[test]
    fn test_split_batches_without_separator() {
        assert_eq!(split_batches("SELECT 1;"), vec!["SELECT 1;"]);
        assert!(split_batches("GO\n\nGO").is_empty());
    }

    #[test]
    fn test_ado_parsing_and_database() {
        let ado = AdoConnectionString::parse(
            "Server=tcp:localhost,1433;Initial Catalog=Flags;User ID=sa;Password={p@ss;word};TrustServerCertificate=true",
        )
        .unwrap();
        assert_eq!(ado.database().as_deref(), Some("Flags"));
        assert_eq!(ado.get("password"), Some("{p@ss;word}"));
        assert_eq!(ado.get("trustservercertificate"), Some("true"));
    }

    #[test]
    fn test_ado_with_database_replaces_catalog() {
        let ado = AdoConnectionString::parse("Server=localhost;Database=Flags;User Id=sa;").unwrap();
        let admin = ado.with_database("master");
        assert_eq!(admin.database().as_deref(), Some("master"));
        assert_eq!(admin.to_string(), "Server=localhost;User Id=sa;Database=master;");
    }

    #[test]
    fn test_ado_rejects_garbage() {
        assert!(AdoConnectionString::parse("Server=localhost;garbage")
            .unwrap_err()
            .is_configuration());
        assert!(AdoConnectionString::parse("=value").unwrap_err().is_configuration());
    }

    #[test]
    fn test_target_database_is_required() {
        let ado = AdoConnectionString::parse("Server=localhost;User Id=sa").unwrap();
        assert!(SqlServerGateway::target_database(&ado).unwrap_err().is_configuration());
    }

    #[test]
    fn test_ledger_table_is_schema_qualified() {
        let gateway = SqlServerGateway::new(MigrationConfig::default());
        assert_eq!(gateway.ledger_table(), "[dbo].[__migrationhistory]");
        assert_eq!(quote_identifier("odd]name"), "[odd]]name]");
    }
}
