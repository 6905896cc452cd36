//! Fakes shared by the use-case tests.

use super::embedding_service::TextEmbedder;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::schema::{ColumnMetadata, ForeignKey, KeyKind, TableMetadata};
use crate::infrastructure::db::sqlite::SqliteDatabase;
use crate::infrastructure::db::PoolSettings;
use crate::infrastructure::llm_clients::LLMClient;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Bag-of-words embedder: each token bumps one hashed bucket.
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimension: 512 }
    }
}

impl HashingEmbedder {
    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| t.len() > 2)
        {
            let hash = token
                .bytes()
                .fold(1469598103934665603u64, |h, b| (h ^ b as u64).wrapping_mul(1099511628211));
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// LLM fake that replays canned replies in order.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMClient for ScriptedLlm {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system.to_string(),
            user: user.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LLMError("no scripted reply left".to_string())))
    }
}

fn column(name: &str, data_type: &str, key: KeyKind) -> ColumnMetadata {
    ColumnMetadata {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: key != KeyKind::Primary,
        key,
    }
}

fn table(name: &str, row_count: i64, columns: Vec<ColumnMetadata>) -> TableMetadata {
    TableMetadata {
        name: name.to_string(),
        row_count,
        columns,
        ..Default::default()
    }
}

/// Hand-written metadata for a slice of the Northwind schema.
pub fn northwind_tables() -> Vec<TableMetadata> {
    let mut order_details = table(
        "order_details",
        58,
        vec![
            column("id", "int", KeyKind::Primary),
            column("order_id", "int", KeyKind::Indexed),
            column("product_id", "int", KeyKind::Indexed),
            column("quantity", "decimal", KeyKind::None),
            column("unit_price", "decimal", KeyKind::None),
            column("discount", "double", KeyKind::None),
        ],
    );
    order_details.foreign_keys = vec![
        ForeignKey {
            column: "order_id".into(),
            referenced_table: "orders".into(),
            referenced_column: "id".into(),
        },
        ForeignKey {
            column: "product_id".into(),
            referenced_table: "products".into(),
            referenced_column: "id".into(),
        },
    ];

    vec![
        table(
            "customers",
            29,
            vec![
                column("id", "int", KeyKind::Primary),
                column("company", "varchar", KeyKind::Indexed),
                column("first_name", "varchar", KeyKind::None),
                column("city", "varchar", KeyKind::Indexed),
            ],
        ),
        table(
            "employees",
            9,
            vec![
                column("id", "int", KeyKind::Primary),
                column("first_name", "varchar", KeyKind::None),
                column("last_name", "varchar", KeyKind::None),
                column("job_title", "varchar", KeyKind::None),
            ],
        ),
        table(
            "orders",
            48,
            vec![
                column("id", "int", KeyKind::Primary),
                column("employee_id", "int", KeyKind::Indexed),
                column("customer_id", "int", KeyKind::Indexed),
                column("order_date", "datetime", KeyKind::None),
                column("shipping_fee", "decimal", KeyKind::None),
            ],
        ),
        order_details,
        table(
            "products",
            45,
            vec![
                column("id", "int", KeyKind::Primary),
                column("product_name", "varchar", KeyKind::None),
                column("list_price", "decimal", KeyKind::None),
                column("standard_cost", "decimal", KeyKind::None),
                column("category", "varchar", KeyKind::None),
            ],
        ),
    ]
}

/// In-memory SQLite with three customers and a few products.
pub async fn seeded_database() -> SqliteDatabase {
    let db = SqliteDatabase::connect("sqlite::memory:", &PoolSettings::default())
        .await
        .unwrap();
    db.execute_script(
        r#"
        CREATE TABLE customers (
            id INTEGER PRIMARY KEY,
            company TEXT NOT NULL,
            first_name TEXT,
            city TEXT
        );
        CREATE TABLE products (
            id INTEGER PRIMARY KEY,
            product_name TEXT NOT NULL,
            list_price REAL NOT NULL,
            category TEXT
        );
        INSERT INTO customers (company, first_name, city) VALUES
            ('Company A', 'Anna', 'Seattle'),
            ('Company B', 'Antonio', 'Boston'),
            ('Company C', 'Thomas', 'Los Angeles');
        INSERT INTO products (product_name, list_price, category) VALUES
            ('Northwind Traders Chai', 18.0, 'Beverages'),
            ('Northwind Traders Syrup', 10.0, 'Condiments'),
            ('Northwind Traders Cajun Seasoning', 22.0, 'Condiments');
        "#,
    )
    .await
    .unwrap();
    db
}
