//! Schema retrieval index.
//!
//! Each table becomes one text document describing its columns, keys and a
//! few sample rows. Documents are embedded once and searched by cosine
//! similarity against the question.

use super::embedding_service::TextEmbedder;
use super::vector_index::FlatIpIndex;
use crate::domain::error::{AppError, Result};
use crate::domain::query::Row;
use crate::domain::schema::{SchemaDocument, TableMetadata};
use crate::infrastructure::db::BINARY_PLACEHOLDER;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

pub const NOT_INDEXED_MESSAGE: &str = "Schema not indexed yet. Please wait for initialization.";
pub const NO_MATCH_MESSAGE: &str = "No relevant schema found.";
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed(usize),
    AlreadyIndexed,
    NothingToIndex,
}

struct IndexedSchema {
    documents: Vec<SchemaDocument>,
    index: FlatIpIndex,
}

pub struct SchemaRag {
    embedder: Arc<dyn TextEmbedder>,
    default_top_k: usize,
    indexed: OnceCell<IndexedSchema>,
    index_lock: Mutex<()>,
}

impl SchemaRag {
    pub fn new(embedder: Arc<dyn TextEmbedder>, default_top_k: usize) -> Self {
        Self {
            embedder,
            default_top_k,
            indexed: OnceCell::new(),
            index_lock: Mutex::new(()),
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed.initialized()
    }

    pub fn document_count(&self) -> usize {
        self.indexed.get().map(|s| s.documents.len()).unwrap_or(0)
    }

    /// Names of the indexed tables in index order.
    pub fn table_names(&self) -> Vec<String> {
        self.indexed
            .get()
            .map(|s| s.documents.iter().map(|d| d.table_name.clone()).collect())
            .unwrap_or_default()
    }

    /// Embeds one document per table. Runs at most once; later calls and
    /// calls with no tables are no-ops.
    pub async fn index_schema(&self, tables: &[TableMetadata]) -> Result<IndexOutcome> {
        let _guard = self.index_lock.lock().await;
        if self.is_indexed() {
            info!("Schema already indexed, skipping");
            return Ok(IndexOutcome::AlreadyIndexed);
        }

        let drafts = build_schema_documents(tables);
        if drafts.is_empty() {
            info!("No schema documents to index");
            return Ok(IndexOutcome::NothingToIndex);
        }

        info!(tables = drafts.len(), "Indexing table descriptions");
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != drafts.len() {
            return Err(AppError::Internal(format!(
                "Expected {} embeddings, got {}",
                drafts.len(),
                embeddings.len()
            )));
        }

        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        let mut index = FlatIpIndex::new(dimension);
        let mut documents = Vec::with_capacity(drafts.len());
        for (mut doc, embedding) in drafts.into_iter().zip(embeddings) {
            if !index.add(embedding.clone()) {
                return Err(AppError::Internal(format!(
                    "Embedding for {} has {} dimensions, expected {}",
                    doc.table_name,
                    embedding.len(),
                    dimension
                )));
            }
            doc.embedding = embedding;
            documents.push(doc);
        }

        let count = documents.len();
        let _ = self.indexed.set(IndexedSchema { documents, index });
        info!(tables = count, dimension, "Schema indexed");
        Ok(IndexOutcome::Indexed(count))
    }

    /// Concatenated descriptions of the tables most similar to the question.
    pub async fn retrieve(&self, question: &str, top_k: Option<usize>) -> Result<String> {
        let Some(schema) = self.indexed.get() else {
            return Ok(NOT_INDEXED_MESSAGE.to_string());
        };

        let top_k = top_k
            .unwrap_or(self.default_top_k)
            .min(schema.documents.len());
        let query = self.embedder.embed_one(question).await?;
        if query.len() != schema.index.dimension() {
            return Err(AppError::Internal(format!(
                "Question embedding has {} dimensions, index expects {}",
                query.len(),
                schema.index.dimension()
            )));
        }
        let hits = schema.index.search(&query, top_k);

        debug!(
            hits = ?hits
                .iter()
                .map(|h| (schema.documents[h.position].table_name.as_str(), h.score))
                .collect::<Vec<_>>(),
            "Schema retrieval"
        );

        let parts: Vec<&str> = hits
            .iter()
            .filter_map(|hit| schema.documents.get(hit.position))
            .map(|doc| doc.text.as_str())
            .collect();

        if parts.is_empty() {
            return Ok(NO_MATCH_MESSAGE.to_string());
        }
        Ok(parts.join(CONTEXT_SEPARATOR))
    }
}

/// One unembedded document per table.
pub fn build_schema_documents(tables: &[TableMetadata]) -> Vec<SchemaDocument> {
    tables
        .iter()
        .map(|table| SchemaDocument {
            id: format!("table_{}", table.name),
            table_name: table.name.clone(),
            text: describe_table(table),
            embedding: vec![],
        })
        .collect()
}

pub fn describe_table(table: &TableMetadata) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "Table: {}", table.name);
    if !table.comment.trim().is_empty() {
        let _ = writeln!(doc, "Description: {}", table.comment.trim());
    }
    let _ = writeln!(doc, "Row count: {}", table.row_count);

    let _ = writeln!(doc, "Columns:");
    for column in &table.columns {
        let nullable = if column.nullable { "nullable" } else { "not null" };
        let key = column
            .key
            .label()
            .map(|label| format!(" ({})", label))
            .unwrap_or_default();
        let _ = writeln!(
            doc,
            "  - {}: {}, {}{}",
            column.name, column.data_type, nullable, key
        );
    }

    if !table.foreign_keys.is_empty() {
        let _ = writeln!(doc, "Foreign Keys:");
        for fk in &table.foreign_keys {
            let _ = writeln!(
                doc,
                "  - {} → {}.{}",
                fk.column, fk.referenced_table, fk.referenced_column
            );
        }
    }

    if !table.sample_rows.is_empty() {
        let _ = writeln!(doc, "Sample Data:");
        for (i, row) in table.sample_rows.iter().take(3).enumerate() {
            let _ = writeln!(doc, "  Row {}: {}", i + 1, render_sample_row(row));
        }
    }

    doc
}

/// Sample row without nulls and binary placeholders.
fn render_sample_row(row: &Row) -> String {
    let cleaned: Row = row
        .iter()
        .filter(|(_, v)| !v.is_null() && v.as_str() != Some(BINARY_PLACEHOLDER))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::Value::Object(cleaned).to_string()
}
