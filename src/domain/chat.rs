use serde::{Deserialize, Serialize};

use super::query::{QueryResult, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Tabular payload returned to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl From<QueryResult> for ResultTable {
    fn from(result: QueryResult) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows,
            row_count: result.row_count,
        }
    }
}

/// Body of `POST /api/chat` responses.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: Option<String>,
    pub sql: Option<String>,
    pub results: Option<ResultTable>,
    pub execution_time: f64,
    pub follow_ups: Vec<String>,
    pub error: Option<String>,
}

/// Seconds rounded to two decimals.
pub fn round_seconds(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}
