use super::{
    database_name_from_url, describe_sqlx_error, float_value, iso_datetime, with_timeout,
    PoolSettings, RowSet, SqlDatabase, SqlDialect, BINARY_PLACEHOLDER,
};
use crate::domain::error::{AppError, Result};
use crate::domain::query::Row as JsonRow;
use crate::domain::schema::{ColumnMetadata, ForeignKey, KeyKind};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::time::Duration;

pub struct PostgresDatabase {
    pool: PgPool,
    database: String,
    query_timeout: Duration,
}

impl PostgresDatabase {
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect(url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        Ok(Self {
            pool,
            database: database_name_from_url(url),
            query_timeout: settings.query_timeout,
        })
    }

    fn column_value(row: &PgRow, index: usize) -> Value {
        match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            _ => {}
        }

        let type_name = row.column(index).type_info().name().to_ascii_uppercase();
        let decoded = match type_name.as_str() {
            "BOOL" => row.try_get::<bool, _>(index).ok().map(Value::Bool),
            "INT2" => row
                .try_get::<i16, _>(index)
                .ok()
                .map(|v| Value::Number(v.into())),
            "INT4" => row
                .try_get::<i32, _>(index)
                .ok()
                .map(|v| Value::Number(v.into())),
            "INT8" => row
                .try_get::<i64, _>(index)
                .ok()
                .map(|v| Value::Number(v.into())),
            "FLOAT4" => row
                .try_get::<f32, _>(index)
                .ok()
                .map(|v| float_value(v as f64)),
            "FLOAT8" => row.try_get::<f64, _>(index).ok().map(float_value),
            "NUMERIC" => row
                .try_get::<BigDecimal, _>(index)
                .ok()
                .map(|v| Value::String(v.to_string())),
            "DATE" => row
                .try_get::<chrono::NaiveDate, _>(index)
                .ok()
                .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
            "TIMESTAMP" => row
                .try_get::<chrono::NaiveDateTime, _>(index)
                .ok()
                .map(|v| Value::String(iso_datetime(v))),
            "TIMESTAMPTZ" => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
                .ok()
                .map(|v| Value::String(v.to_rfc3339())),
            "TIME" => row
                .try_get::<chrono::NaiveTime, _>(index)
                .ok()
                .map(|v| Value::String(v.to_string())),
            "BYTEA" => Some(Value::String(BINARY_PLACEHOLDER.to_string())),
            _ => row.try_get::<String, _>(index).ok().map(Value::String),
        };

        decoded.unwrap_or_else(|| Value::String(format!("<{}>", type_name.to_lowercase())))
    }
}

#[async_trait]
impl SqlDatabase for PostgresDatabase {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn fetch_rows(&self, sql: &str) -> Result<RowSet> {
        let mut conn = with_timeout(self.query_timeout, self.pool.acquire()).await?;

        let rows = with_timeout(self.query_timeout, sqlx::query(sql).fetch_all(&mut *conn)).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => (&mut *conn)
                .describe(sql)
                .await
                .map(|d| d.columns().iter().map(|c| c.name().to_string()).collect())
                .map_err(|e| AppError::DatabaseError(describe_sqlx_error(e)))?,
        };

        let rows = rows
            .iter()
            .map(|row| {
                let mut map = JsonRow::new();
                for (i, column) in row.columns().iter().enumerate() {
                    map.insert(column.name().to_string(), Self::column_value(row, i));
                }
                map
            })
            .collect();

        Ok(RowSet { columns, rows })
    }

    async fn list_tables(&self) -> Result<Vec<(String, String)>> {
        let sql = r#"
            SELECT t.table_name::text,
                   COALESCE(obj_description(
                       (quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass,
                       'pg_class'), '') AS table_comment
            FROM information_schema.tables t
            WHERE t.table_schema = 'public' AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
        "#;
        with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String)>(sql).fetch_all(&self.pool),
        )
        .await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let columns_sql = r#"
            SELECT column_name::text, data_type::text, (is_nullable = 'YES') AS nullable
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
        "#;
        let keys_sql = r#"
            SELECT kcu.column_name::text, tc.constraint_type::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = 'public' AND tc.table_name = $1
              AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY')
        "#;

        let columns = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String, bool)>(columns_sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;
        let keys = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String)>(keys_sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        let mut key_kinds: HashMap<String, KeyKind> = HashMap::new();
        for (column, constraint_type) in keys {
            let kind = match constraint_type.as_str() {
                "PRIMARY KEY" => KeyKind::Primary,
                "UNIQUE" => KeyKind::Unique,
                _ => KeyKind::Indexed,
            };
            let entry = key_kinds.entry(column).or_insert(kind);
            if key_rank(kind) < key_rank(*entry) {
                *entry = kind;
            }
        }

        Ok(columns
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnMetadata {
                key: key_kinds.get(&name).copied().unwrap_or_default(),
                name,
                data_type,
                nullable,
            })
            .collect())
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = 'public' AND tc.table_name = $1
            ORDER BY kcu.ordinal_position
        "#;
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String, String)>(sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(column, referenced_table, referenced_column)| ForeignKey {
                column,
                referenced_table,
                referenced_column,
            })
            .collect())
    }
}

/// Lower wins when a column carries several constraints.
fn key_rank(kind: KeyKind) -> u8 {
    match kind {
        KeyKind::Primary => 0,
        KeyKind::Unique => 1,
        KeyKind::Indexed => 2,
        KeyKind::None => 3,
    }
}
