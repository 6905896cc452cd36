use serde::Serialize;

/// One result row, keyed by column name in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of running a statement through the query executor.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub error: Option<String>,
}

impl QueryResult {
    pub fn success(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            success: true,
            columns,
            row_count: rows.len(),
            rows,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: vec![],
            rows: vec![],
            row_count: 0,
            error: Some(error.into()),
        }
    }
}

/// SQL produced by the model plus the verdict of the generation-side check.
#[derive(Debug, Clone, Default)]
pub struct SqlCandidate {
    pub raw_response: String,
    pub sql: String,
    pub is_valid: bool,
    pub error: Option<String>,
}

impl SqlCandidate {
    pub fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// True when there is SQL worth executing.
    pub fn is_executable(&self) -> bool {
        self.is_valid && !self.sql.trim().is_empty()
    }
}
