//! PostgreSQL Backend Implementation
//!
//! Schema-namespaced gateway built on sqlx. The descriptor is a `postgres://` URL; the
//! schema comes from its `search_path` (or `currentSchema`) query parameter and falls back
//! to the configured default. Scripts are prefixed with `SET search_path` and sent as one
//! simple-protocol unit.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Executor, Row, TypeInfo, ValueRef};
use std::str::FromStr;
use url::Url;

use super::core::*;
use super::sqlserver::AdoConnectionString;
use crate::backends::BackendType;
use crate::config::{defaults, MigrationConfig};
use crate::error::{MigrateResult, MigrationError};
use crate::migrations::definitions::{AppliedMigration, MigrationDefinition};

/// Query parameters naming the active schema
const SCHEMA_PARAMS: [&str; 2] = ["search_path", "currentSchema"];

/// PostgreSQL migration gateway
#[derive(Debug, Clone)]
pub struct PostgresGateway {
    config: MigrationConfig,
}

/// Connection target resolved from a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresTarget {
    endpoint: Endpoint,
    pub database: String,
    pub schema: String,
}

/// Where the server is, as given by the descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    /// `postgres://` URL handed to the driver, schema parameters removed
    Url(Url),
    /// `Host=...;Database=...` keyword form
    Keywords(KeywordEndpoint),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeywordEndpoint {
    host: String,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    ssl_mode: Option<String>,
}

impl PostgresTarget {
    /// Parse a `postgres://` URL or a `Host=...;Database=...` keyword string
    pub fn parse(descriptor: &str, default_schema: &str) -> MigrateResult<Self> {
        if descriptor.contains("://") {
            Self::parse_url(descriptor, default_schema)
        } else {
            Self::parse_keywords(descriptor, default_schema)
        }
    }

    fn parse_url(descriptor: &str, default_schema: &str) -> MigrateResult<Self> {
        let mut url = Url::parse(descriptor)
            .map_err(|e| MigrationError::configuration(format!("Invalid PostgreSQL URL: {}", e)))?;

        if url.scheme() != "postgres" && url.scheme() != "postgresql" {
            return Err(MigrationError::configuration(format!(
                "Invalid PostgreSQL URL scheme: {}",
                url.scheme()
            )));
        }

        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(MigrationError::configuration(
                "Missing database name in PostgreSQL URL",
            ));
        }

        let mut schema = None;
        let mut kept = Vec::new();
        for (key, value) in url.query_pairs() {
            if SCHEMA_PARAMS.contains(&&*key) {
                schema = first_schema(&value).or(schema);
            } else {
                kept.push((key.into_owned(), value.into_owned()));
            }
        }

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        Ok(Self {
            endpoint: Endpoint::Url(url),
            database,
            schema: schema.unwrap_or_else(|| default_schema.to_string()),
        })
    }

    fn parse_keywords(descriptor: &str, default_schema: &str) -> MigrateResult<Self> {
        let pairs = AdoConnectionString::parse(descriptor)?;

        let host = pairs.value(&["host", "server"]).ok_or_else(|| {
            MigrationError::configuration("PostgreSQL connection string must name a Host")
        })?;
        let database = pairs.value(&["database"]).ok_or_else(|| {
            MigrationError::configuration("PostgreSQL connection string must name a Database")
        })?;
        let port = pairs
            .value(&["port"])
            .map(|port| {
                port.parse::<u16>().map_err(|_| {
                    MigrationError::configuration(format!("Invalid PostgreSQL port: {}", port))
                })
            })
            .transpose()?;
        let schema = pairs
            .value(&["search path", "searchpath"])
            .and_then(|value| first_schema(&value));

        Ok(Self {
            endpoint: Endpoint::Keywords(KeywordEndpoint {
                host,
                port,
                username: pairs.value(&["username", "user id", "userid", "user"]),
                password: pairs.value(&["password", "pwd"]),
                ssl_mode: pairs.value(&["ssl mode", "sslmode"]),
            }),
            database,
            schema: schema.unwrap_or_else(|| default_schema.to_string()),
        })
    }

    fn connect_options(&self) -> MigrateResult<PgConnectOptions> {
        match &self.endpoint {
            Endpoint::Url(url) => PgConnectOptions::from_str(url.as_str()).map_err(|e| {
                MigrationError::configuration(format!("Invalid PostgreSQL URL: {}", e))
            }),
            Endpoint::Keywords(keywords) => {
                let mut options = PgConnectOptions::new()
                    .host(&keywords.host)
                    .database(&self.database);
                if let Some(port) = keywords.port {
                    options = options.port(port);
                }
                if let Some(username) = &keywords.username {
                    options = options.username(username);
                }
                if let Some(password) = &keywords.password {
                    options = options.password(password);
                }
                if let Some(mode) = &keywords.ssl_mode {
                    options = options.ssl_mode(parse_ssl_mode(mode)?);
                }
                Ok(options)
            }
        }
    }

    fn admin_options(&self) -> MigrateResult<PgConnectOptions> {
        Ok(self.connect_options()?.database(defaults::POSTGRES_ADMIN_DATABASE))
    }
}

/// First element of a comma-separated schema list
fn first_schema(value: &str) -> Option<String> {
    let first = value.split(',').next().unwrap_or_default().trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Accepts both `verify-full` and the `VerifyFull` spelling
fn parse_ssl_mode(mode: &str) -> MigrateResult<PgSslMode> {
    let normalized = match mode.to_ascii_lowercase().as_str() {
        "verifyca" => "verify-ca".to_string(),
        "verifyfull" => "verify-full".to_string(),
        other => other.to_string(),
    };
    PgSslMode::from_str(&normalized)
        .map_err(|_| MigrationError::configuration(format!("Invalid PostgreSQL SSL mode: {}", mode)))
}

/// Quote an identifier for PostgreSQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Prefix a script with the statement selecting the active schema
pub fn scoped_script(schema: &str, script: &str) -> String {
    format!("SET search_path TO {};\n{}", quote_identifier(schema), script)
}

impl PostgresGateway {
    /// Create a new PostgreSQL gateway
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    fn target(&self, descriptor: &str) -> MigrateResult<PostgresTarget> {
        PostgresTarget::parse(descriptor, &self.config.postgres_schema)
    }

    fn ledger_table(&self, target: &PostgresTarget) -> String {
        format!(
            "{}.{}",
            quote_identifier(&target.schema),
            quote_identifier(&self.config.ledger_table)
        )
    }

    async fn connect(options: &PgConnectOptions) -> MigrateResult<PgConnection> {
        let conn = PgConnection::connect_with(options).await?;
        tracing::debug!("PostgreSQL connection opened");
        Ok(conn)
    }

    async fn ensure_schema(&self, conn: &mut PgConnection, schema: &str) -> MigrateResult<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema));
        conn.execute(sql.as_str()).await?;
        tracing::debug!("Schema '{}' ensured", schema);
        Ok(())
    }
}

#[async_trait]
impl MigrationGateway for PostgresGateway {
    fn backend(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    async fn database_exists(&self, descriptor: &str) -> MigrateResult<bool> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.admin_options()?).await?;
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM pg_database WHERE datname = $1")
                    .bind(&target.database)
                    .fetch_one(&mut conn)
                    .await?;
            conn.close().await?;
            Ok(count > 0)
        })
        .await
    }

    async fn create_database(&self, descriptor: &str) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut admin = Self::connect(&target.admin_options()?).await?;
            let sql = format!("CREATE DATABASE {}", quote_identifier(&target.database));
            admin.execute(sql.as_str()).await?;
            admin.close().await?;
            tracing::info!("Database {} created successfully", target.database);

            let mut conn = Self::connect(&target.connect_options()?).await?;
            self.ensure_schema(&mut conn, &target.schema).await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn ledger_exists(&self, descriptor: &str) -> MigrateResult<bool> {
        let target = self.target(descriptor)?;
        tracing::debug!("Checking for migration ledger in {} schema", target.schema);
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
            )
            .bind(&target.schema)
            .bind(&self.config.ledger_table)
            .fetch_one(&mut conn)
            .await?;
            conn.close().await?;
            Ok(count > 0)
        })
        .await
    }

    async fn create_ledger(&self, descriptor: &str) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            self.ensure_schema(&mut conn, &target.schema).await?;
            let sql = format!(
                "CREATE TABLE {} (\n    \
                    version VARCHAR(50) NOT NULL PRIMARY KEY,\n    \
                    description VARCHAR(500) NOT NULL,\n    \
                    applied_at TIMESTAMP NOT NULL\n\
                )",
                self.ledger_table(&target)
            );
            conn.execute(sql.as_str()).await?;
            conn.close().await?;
            tracing::info!("Migration ledger created in schema {}", target.schema);
            Ok(())
        })
        .await
    }

    async fn read_ledger(&self, descriptor: &str) -> MigrateResult<Vec<AppliedMigration>> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let sql = format!(
                "SELECT version, description, applied_at FROM {} ORDER BY version",
                self.ledger_table(&target)
            );
            let rows = sqlx::query(&sql).fetch_all(&mut conn).await?;
            conn.close().await?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let applied_at: NaiveDateTime = row.try_get("applied_at")?;
                records.push(AppliedMigration {
                    version: row.try_get("version")?,
                    description: row.try_get("description")?,
                    applied_at: DateTime::from_naive_utc_and_offset(applied_at, Utc),
                });
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
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let sql = format!(
                "INSERT INTO {} (version, description, applied_at) VALUES ($1, $2, $3)",
                self.ledger_table(&target)
            );
            sqlx::query(&sql)
                .bind(version)
                .bind(description)
                .bind(Utc::now().naive_utc())
                .execute(&mut conn)
                .await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn remove_ledger_row(&self, descriptor: &str, version: &str) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let sql = format!("DELETE FROM {} WHERE version = $1", self.ledger_table(&target));
            sqlx::query(&sql).bind(version).execute(&mut conn).await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn execute_script(&self, descriptor: &str, script: &str) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            conn.execute(scoped_script(&target.schema, script).as_str()).await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn execute_scalar(&self, descriptor: &str, query: &str) -> MigrateResult<ScalarValue> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let row = sqlx::query(query).fetch_optional(&mut conn).await?;
            conn.close().await?;
            match row {
                Some(row) => first_column_value(&row),
                None => Ok(ScalarValue::Null),
            }
        })
        .await
    }

    async fn apply_migration(
        &self,
        descriptor: &str,
        migration: &MigrationDefinition,
    ) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let mut tx = conn.begin().await?;

            (&mut *tx)
                .execute(scoped_script(&target.schema, &migration.up_script).as_str())
                .await?;

            let sql = format!(
                "INSERT INTO {} (version, description, applied_at) VALUES ($1, $2, $3)",
                self.ledger_table(&target)
            );
            sqlx::query(&sql)
                .bind(&migration.version)
                .bind(&migration.description)
                .bind(Utc::now().naive_utc())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn revert_migration(
        &self,
        descriptor: &str,
        version: &str,
        down_script: &str,
    ) -> MigrateResult<()> {
        let target = self.target(descriptor)?;
        with_timeout(self.config.execution_timeout, async {
            let mut conn = Self::connect(&target.connect_options()?).await?;
            let mut tx = conn.begin().await?;

            (&mut *tx)
                .execute(scoped_script(&target.schema, down_script).as_str())
                .await?;

            let sql = format!("DELETE FROM {} WHERE version = $1", self.ledger_table(&target));
            sqlx::query(&sql).bind(version).execute(&mut *tx).await?;

            tx.commit().await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }
}

/// Convert the first column of a row into a [`ScalarValue`]
fn first_column_value(row: &PgRow) -> MigrateResult<ScalarValue> {
    let Some(column) = row.columns().first() else {
        return Ok(ScalarValue::Null);
    };

    if row.try_get_raw(0)?.is_null() {
        return Ok(ScalarValue::Null);
    }

    let value = match column.type_info().name() {
        "BOOL" => ScalarValue::Bool(row.try_get(0)?),
        "INT2" => ScalarValue::Int(i64::from(row.try_get::<i16, _>(0)?)),
        "INT4" => ScalarValue::Int(i64::from(row.try_get::<i32, _>(0)?)),
        "INT8" => ScalarValue::Int(row.try_get(0)?),
        "FLOAT4" => ScalarValue::Float(f64::from(row.try_get::<f32, _>(0)?)),
        "FLOAT8" => ScalarValue::Float(row.try_get(0)?),
        "TIMESTAMPTZ" => ScalarValue::Timestamp(row.try_get(0)?),
        "TIMESTAMP" => ScalarValue::Timestamp(DateTime::from_naive_utc_and_offset(
            row.try_get::<NaiveDateTime, _>(0)?,
            Utc,
        )),
        other => ScalarValue::Text(row.try_get::<String, _>(0).map_err(|e| {
            MigrationError::Execution(format!(
                "Unsupported scalar type '{}': {}",
                other, e
            ))
        })?),
    };
    Ok(value)
}
