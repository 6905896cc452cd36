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
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::time::Duration;

pub struct MySqlDatabase {
    pool: MySqlPool,
    database: String,
    query_timeout: Duration,
}

impl MySqlDatabase {
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to MySQL: {}", e)))?;

        Ok(Self {
            pool,
            database: database_name_from_url(url),
            query_timeout: settings.query_timeout,
        })
    }

    fn column_value(row: &MySqlRow, index: usize) -> Value {
        match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            _ => {}
        }

        let type_name = row.column(index).type_info().name().to_ascii_uppercase();
        if type_name.contains("BLOB") || type_name.contains("BINARY") || type_name == "BIT" {
            return Value::String(BINARY_PLACEHOLDER.to_string());
        }

        match type_name.as_str() {
            "BOOLEAN" => {
                if let Ok(v) = row.try_get::<bool, _>(index) {
                    return Value::Bool(v);
                }
            }
            "DECIMAL" => {
                if let Ok(v) = row.try_get::<BigDecimal, _>(index) {
                    return Value::String(v.to_string());
                }
            }
            "FLOAT" => {
                if let Ok(v) = row.try_get::<f32, _>(index) {
                    return float_value(v as f64);
                }
            }
            "DOUBLE" => {
                if let Ok(v) = row.try_get::<f64, _>(index) {
                    return float_value(v);
                }
            }
            "DATE" => {
                if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
                    return Value::String(v.format("%Y-%m-%d").to_string());
                }
            }
            "DATETIME" => {
                if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
                    return Value::String(iso_datetime(v));
                }
            }
            "TIMESTAMP" => {
                if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
                    return Value::String(v.to_rfc3339());
                }
            }
            "TIME" => {
                if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(index) {
                    return Value::String(v.to_string());
                }
            }
            t if t.ends_with("UNSIGNED") => {
                if let Ok(v) = row.try_get::<u64, _>(index) {
                    return Value::Number(v.into());
                }
            }
            _ => {}
        }

        if let Ok(v) = row.try_get::<i64, _>(index) {
            return Value::Number(v.into());
        }
        if let Ok(v) = row.try_get::<String, _>(index) {
            return Value::String(v);
        }
        if let Ok(v) = row.try_get::<f64, _>(index) {
            return float_value(v);
        }
        if row.try_get::<Vec<u8>, _>(index).is_ok() {
            return Value::String(BINARY_PLACEHOLDER.to_string());
        }
        Value::String(format!("<{}>", type_name.to_lowercase()))
    }
}

#[async_trait]
impl SqlDatabase for MySqlDatabase {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
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
        let sql = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
                   CAST(COALESCE(TABLE_COMMENT, '') AS CHAR) AS table_comment \
                   FROM INFORMATION_SCHEMA.TABLES \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
                   ORDER BY TABLE_NAME";
        with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String)>(sql).fetch_all(&self.pool),
        )
        .await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let sql = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR), \
                   CAST(IS_NULLABLE AS CHAR), CAST(COLUMN_KEY AS CHAR) \
                   FROM INFORMATION_SCHEMA.COLUMNS \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                   ORDER BY ORDINAL_POSITION";
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String, String, String)>(sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, key)| ColumnMetadata {
                name,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                key: KeyKind::from_mysql_code(&key),
            })
            .collect())
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(REFERENCED_TABLE_NAME AS CHAR), \
                   CAST(REFERENCED_COLUMN_NAME AS CHAR) \
                   FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
                   WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                   AND REFERENCED_TABLE_NAME IS NOT NULL \
                   ORDER BY ORDINAL_POSITION";
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
