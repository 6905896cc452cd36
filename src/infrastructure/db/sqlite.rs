use super::{
    describe_sqlx_error, float_value, with_timeout, PoolSettings, RowSet, SqlDatabase,
    SqlDialect, BINARY_PLACEHOLDER,
};
use crate::domain::error::{AppError, Result};
use crate::domain::query::Row as JsonRow;
use crate::domain::schema::{ColumnMetadata, ForeignKey, KeyKind};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

pub struct SqliteDatabase {
    pool: SqlitePool,
    database: String,
    query_timeout: Duration,
}

impl SqliteDatabase {
    pub async fn connect(url: &str, settings: &PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::DatabaseError(format!("Invalid SQLite URL: {}", e)))?
            .foreign_keys(true);

        // Each in-memory connection is its own database, so keep exactly one alive.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(settings.acquire_timeout);
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(settings.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to SQLite: {}", e)))?;

        Ok(Self {
            pool,
            database: database_name_from_sqlite_url(url),
            query_timeout: settings.query_timeout,
        })
    }

    /// Runs a multi-statement script. Only used to load demo data and fixtures.
    pub async fn execute_script(&self, script: &str) -> Result<()> {
        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| AppError::DatabaseError(format!("Failed to run script: {}", e)))
    }

    fn column_value(row: &SqliteRow, index: usize) -> Value {
        let runtime_type = match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return Value::Null,
        };

        let declared = row.column(index).type_info().name().to_ascii_uppercase();
        if runtime_type == "BLOB" || declared == "BLOB" {
            return Value::String(BINARY_PLACEHOLDER.to_string());
        }
        if declared == "BOOLEAN" {
            if let Ok(v) = row.try_get::<bool, _>(index) {
                return Value::Bool(v);
            }
        }

        if let Ok(v) = row.try_get::<i64, _>(index) {
            return Value::Number(v.into());
        }
        if let Ok(v) = row.try_get::<f64, _>(index) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<String, _>(index) {
            return Value::String(v);
        }
        Value::String(format!("<{}>", declared.to_lowercase()))
    }
}

fn database_name_from_sqlite_url(url: &str) -> String {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return "memory".to_string();
    }
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[async_trait]
impl SqlDatabase for SqliteDatabase {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
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
        let sql = "SELECT name, '' FROM sqlite_master \
                   WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                   ORDER BY name";
        with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String)>(sql).fetch_all(&self.pool),
        )
        .await
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let columns_sql = "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid";
        let indexes_sql = "SELECT ii.name, il.\"unique\" \
                           FROM pragma_index_list(?1) il \
                           JOIN pragma_index_info(il.name) ii \
                           WHERE il.origin != 'pk' AND ii.name IS NOT NULL";
        let fk_sql = "SELECT \"from\" FROM pragma_foreign_key_list(?1)";

        let columns = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, String, i64, i64)>(columns_sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;
        let indexes = with_timeout(
            self.query_timeout,
            sqlx::query_as::<_, (String, i64)>(indexes_sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?;
        let fk_columns: HashSet<String> = with_timeout(
            self.query_timeout,
            sqlx::query_scalar::<_, String>(fk_sql)
                .bind(table)
                .fetch_all(&self.pool),
        )
        .await?
        .into_iter()
        .collect();

        Ok(columns
            .into_iter()
            .map(|(name, data_type, not_null, pk)| {
                let key = if pk > 0 {
                    KeyKind::Primary
                } else if indexes.iter().any(|(col, unique)| *col == name && *unique == 1) {
                    KeyKind::Unique
                } else if fk_columns.contains(&name) || indexes.iter().any(|(col, _)| *col == name)
                {
                    KeyKind::Indexed
                } else {
                    KeyKind::None
                };
                ColumnMetadata {
                    nullable: not_null == 0 && pk == 0,
                    data_type: if data_type.is_empty() {
                        "any".to_string()
                    } else {
                        data_type.to_lowercase()
                    },
                    name,
                    key,
                }
            })
            .collect())
    }

    async fn list_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = "SELECT \"from\", \"table\", COALESCE(\"to\", '') \
                   FROM pragma_foreign_key_list(?1) ORDER BY id, seq";
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SqliteDatabase {
        let db = SqliteDatabase::connect("sqlite::memory:", &PoolSettings::default())
            .await
            .unwrap();
        db.execute_script(
            r#"
            CREATE TABLE customers (
                id INTEGER PRIMARY KEY,
                company TEXT NOT NULL,
                email_address TEXT UNIQUE,
                city TEXT
            );
            CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER REFERENCES customers(id),
                order_date DATETIME,
                shipping_fee REAL,
                paid BOOLEAN,
                attachment BLOB
            );
            INSERT INTO customers (company, email_address, city) VALUES
                ('Company A', 'a@example.com', 'Seattle'),
                ('Company B', NULL, 'Boston');
            INSERT INTO orders (customer_id, order_date, shipping_fee, paid, attachment) VALUES
                (1, '2006-01-15 00:00:00', 12.5, 1, x'00FF');
            "#,
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_fetch_rows_converts_values() {
        let db = memory_db().await;
        let set = db
            .fetch_rows("SELECT id, order_date, shipping_fee, paid, attachment FROM orders")
            .await
            .unwrap();
        assert_eq!(
            set.columns,
            vec!["id", "order_date", "shipping_fee", "paid", "attachment"]
        );
        let row = &set.rows[0];
        assert_eq!(row["id"], 1);
        assert_eq!(row["order_date"], "2006-01-15 00:00:00");
        assert_eq!(row["shipping_fee"], 12.5);
        assert_eq!(row["paid"], true);
        assert_eq!(row["attachment"], BINARY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_fetch_rows_keeps_select_order_and_nulls() {
        let db = memory_db().await;
        let set = db
            .fetch_rows("SELECT email_address, company FROM customers ORDER BY id")
            .await
            .unwrap();
        let keys: Vec<&String> = set.rows[0].keys().collect();
        assert_eq!(keys, vec!["email_address", "company"]);
        assert_eq!(set.rows[1]["email_address"], Value::Null);
    }

    #[tokio::test]
    async fn test_empty_result_still_reports_columns() {
        let db = memory_db().await;
        let set = db
            .fetch_rows("SELECT id, company FROM customers WHERE city = 'Nowhere'")
            .await
            .unwrap();
        assert!(set.rows.is_empty());
        assert_eq!(set.columns, vec!["id", "company"]);
    }

    #[tokio::test]
    async fn test_driver_error_is_database_error() {
        let db = memory_db().await;
        let err = db.fetch_rows("SELECT nope FROM customers").await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseError(_)));
        assert!(err.detail().contains("nope"));
    }

    #[tokio::test]
    async fn test_introspection() {
        let db = memory_db().await;
        let tables = db.list_tables().await.unwrap();
        let names: Vec<&str> = tables.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let columns = db.list_columns("customers").await.unwrap();
        assert_eq!(columns[0].key, KeyKind::Primary);
        assert!(!columns[1].nullable);
        assert_eq!(columns[2].key, KeyKind::Unique);
        assert_eq!(columns[3].key, KeyKind::None);

        let order_columns = db.list_columns("orders").await.unwrap();
        assert_eq!(order_columns[1].key, KeyKind::Indexed);

        let fks = db.list_foreign_keys("orders").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].column, "customer_id");
        assert_eq!(fks[0].referenced_table, "customers");
        assert_eq!(fks[0].referenced_column, "id");
    }

    #[tokio::test]
    async fn test_ping() {
        let db = memory_db().await;
        assert!(db.ping().await.is_ok());
        assert_eq!(db.database_name(), "memory");
    }

    #[test]
    fn test_database_name_from_file_url() {
        assert_eq!(
            database_name_from_sqlite_url("sqlite://data/northwind.db?mode=ro"),
            "northwind"
        );
    }
}
