//! Read-side database access for the chat pipeline.
//!
//! Engines are picked by URL scheme. Each engine owns one fixed-size pool;
//! every statement acquires a single pooled connection which returns to the
//! pool when the guard drops, on success and on error alike.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::domain::error::{AppError, Result};
use crate::domain::query::Row;
use crate::domain::schema::{ColumnMetadata, ForeignKey};
use crate::infrastructure::config::DatabaseConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const BINARY_PLACEHOLDER: &str = "<binary data>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::MySql => "MySQL",
            SqlDialect::Postgres => "PostgreSQL",
            SqlDialect::Sqlite => "SQLite",
        }
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::Postgres | SqlDialect::Sqlite => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            "sqlite" => Ok(SqlDialect::Sqlite),
            other => Err(AppError::ConfigError(format!(
                "Unsupported database scheme '{}'",
                other
            ))),
        }
    }
}

/// Columns in select-list order plus JSON-safe rows.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
pub trait SqlDatabase: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    fn database_name(&self) -> &str;

    /// Runs one statement and converts every value to a JSON scalar.
    async fn fetch_rows(&self, sql: &str) -> Result<RowSet>;

    /// Base tables with their comments, ordered by name.
    async fn list_tables(&self) -> Result<Vec<(String, String)>>;

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>>;

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    async fn ping(&self) -> Result<()> {
        self.fetch_rows("SELECT 1 AS test").await.map(|_| ())
    }
}

pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn SqlDatabase>> {
    let url = config.connection_url()?;
    let settings = PoolSettings::from(config);
    connect_url(&url, &settings).await
}

pub async fn connect_url(url: &str, settings: &PoolSettings) -> Result<Arc<dyn SqlDatabase>> {
    let dialect = SqlDialect::from_url(url)?;
    info!(
        dialect = dialect.name(),
        url = %redact_url(url),
        max_connections = settings.max_connections,
        "Connecting to database"
    );

    let db: Arc<dyn SqlDatabase> = match dialect {
        SqlDialect::MySql => Arc::new(mysql::MySqlDatabase::connect(url, settings).await?),
        SqlDialect::Postgres => {
            Arc::new(postgres::PostgresDatabase::connect(url, settings).await?)
        }
        SqlDialect::Sqlite => Arc::new(sqlite::SqliteDatabase::connect(url, settings).await?),
    };
    Ok(db)
}

/// Replaces the password of a connection URL for logging.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Database name taken from the URL path, e.g. `northwind` in
/// `mysql://root@localhost:3306/northwind`.
pub(crate) fn database_name_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| u.path().trim_start_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_default()
}

pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| {
            AppError::DatabaseError(format!(
                "Query timed out after {} seconds",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| AppError::DatabaseError(describe_sqlx_error(e)))
}

/// Driver message without sqlx's wrapper text where a database error exists.
pub(crate) fn describe_sqlx_error(err: sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("({}) {}", code, db_err.message()),
            None => db_err.message().to_string(),
        },
        sqlx::Error::PoolTimedOut => "Timed out waiting for a database connection".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn float_value(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

pub(crate) fn iso_datetime(value: chrono::NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}
