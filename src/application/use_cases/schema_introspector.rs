use crate::domain::error::Result;
use crate::domain::schema::TableMetadata;
use crate::infrastructure::db::SqlDatabase;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SAMPLE_ROW_LIMIT: usize = 3;

/// Collects table metadata for the schema index.
pub struct SchemaIntrospector {
    db: Arc<dyn SqlDatabase>,
}

impl SchemaIntrospector {
    pub fn new(db: Arc<dyn SqlDatabase>) -> Self {
        Self { db }
    }

    /// Describes every base table. Failures are logged and yield an empty
    /// list so startup can continue with an unindexed schema.
    pub async fn introspect(&self) -> Vec<TableMetadata> {
        let tables = match self.db.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                error!(error = %e, "Failed to list tables");
                return vec![];
            }
        };

        let mut described = Vec::with_capacity(tables.len());
        for (name, comment) in tables {
            match self.describe_table(&name, comment).await {
                Ok(table) => described.push(table),
                Err(e) => warn!(table = %name, error = %e, "Skipping table"),
            }
        }

        info!(
            database = self.db.database_name(),
            tables = described.len(),
            "Schema introspection complete"
        );
        described
    }

    pub async fn describe_table(&self, name: &str, comment: String) -> Result<TableMetadata> {
        let columns = self.db.list_columns(name).await?;
        let foreign_keys = self.db.list_foreign_keys(name).await?;
        let quoted = self.db.dialect().quote_identifier(name);

        let row_count = self
            .db
            .fetch_rows(&format!("SELECT COUNT(*) AS row_count FROM {}", quoted))
            .await?
            .rows
            .first()
            .and_then(|row| row.get("row_count"))
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0);

        let sample_rows = match self
            .db
            .fetch_rows(&format!("SELECT * FROM {} LIMIT {}", quoted, SAMPLE_ROW_LIMIT))
            .await
        {
            Ok(set) => set.rows,
            Err(e) => {
                debug!(table = %name, error = %e, "Sample rows unavailable");
                vec![]
            }
        };

        Ok(TableMetadata {
            name: name.to_string(),
            comment,
            row_count,
            columns,
            foreign_keys,
            sample_rows,
        })
    }
}
