//! Question answering pipeline: schema retrieval, SQL generation, execution
//! with bounded error-feedback retries, answer synthesis and follow-ups.

use super::query_executor::QueryExecutor;
use super::schema_index::SchemaRag;
use super::sql_generator::SqlGenerator;
use crate::domain::chat::{round_seconds, ChatResponse, ResultTable};
use crate::domain::error::Result;
use crate::domain::query::QueryResult;
use crate::infrastructure::db::SqlDatabase;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const GENERATION_APOLOGY: &str =
    "I couldn't generate a SQL query for that question. Could you rephrase it?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    RetrievedContext,
    SqlGenerated,
    ExecutedOk,
    RetryGenerated,
    RetryExecuted,
    Answered,
    Responded,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "received",
            PipelineStage::RetrievedContext => "retrieved-context",
            PipelineStage::SqlGenerated => "sql-generated",
            PipelineStage::ExecutedOk => "executed-ok",
            PipelineStage::RetryGenerated => "retry-generated",
            PipelineStage::RetryExecuted => "retry-executed",
            PipelineStage::Answered => "answered",
            PipelineStage::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Response plus whether the exchange belongs in the session history.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: ChatResponse,
    pub record_history: bool,
}

pub struct PipelineOptions {
    pub max_sql_retries: u32,
    pub follow_ups: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_sql_retries: 1,
            follow_ups: true,
        }
    }
}

pub struct ChatPipeline {
    rag: Arc<SchemaRag>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    options: PipelineOptions,
}

fn enter(stage: PipelineStage) {
    debug!(stage = %stage, "Chat pipeline");
}

impl ChatPipeline {
    pub fn new(
        rag: Arc<SchemaRag>,
        generator: SqlGenerator,
        executor: QueryExecutor,
        options: PipelineOptions,
    ) -> Self {
        Self {
            rag,
            generator,
            executor,
            options,
        }
    }

    pub fn rag(&self) -> &SchemaRag {
        &self.rag
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    pub fn database(&self) -> &Arc<dyn SqlDatabase> {
        self.executor.database()
    }

    /// Answers one already-trimmed, non-empty question. Only context
    /// retrieval can fail; every later stage folds its errors into the
    /// response.
    pub async fn process(&self, question: &str) -> Result<ChatOutcome> {
        let started = Instant::now();
        enter(PipelineStage::Received);

        let context = self.rag.retrieve(question, None).await?;
        enter(PipelineStage::RetrievedContext);

        let candidate = self.generator.generate_sql(question, &context).await;
        enter(PipelineStage::SqlGenerated);

        if !candidate.is_executable() {
            info!(error = ?candidate.error, "No executable SQL generated");
            debug!(raw = %candidate.raw_response, "Model reply without executable SQL");
            let answer = candidate
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| GENERATION_APOLOGY.to_string());
            enter(PipelineStage::Responded);
            return Ok(ChatOutcome {
                response: ChatResponse {
                    answer: Some(answer),
                    sql: Some(candidate.sql).filter(|s| !s.is_empty()),
                    results: None,
                    execution_time: round_seconds(started.elapsed()),
                    follow_ups: vec![],
                    error: candidate.error,
                },
                record_history: false,
            });
        }

        let mut sql = candidate.sql;
        let mut result = self.executor.execute(&sql).await;
        if result.success {
            enter(PipelineStage::ExecutedOk);
        } else {
            let (retry_sql, retry_result) = self.retry(question, &context, &sql, result).await;
            if let Some(fixed) = retry_sql {
                sql = fixed;
            }
            result = retry_result;
        }

        let answer = if result.success {
            self.generator.generate_answer(question, &sql, &result).await
        } else {
            format!(
                "I generated the SQL but it failed to execute: {}",
                result.error.as_deref().unwrap_or_default()
            )
        };
        enter(PipelineStage::Answered);

        let follow_ups = if self.options.follow_ups && result.success && !answer.is_empty() {
            self.generator.generate_follow_ups(question, &answer).await
        } else {
            vec![]
        };

        let execution_time = round_seconds(started.elapsed());
        info!(
            success = result.success,
            rows = result.row_count,
            execution_time,
            "Question answered"
        );
        enter(PipelineStage::Responded);

        let error = if result.success { None } else { result.error.clone() };
        let results = result.success.then(|| ResultTable::from(result));
        Ok(ChatOutcome {
            response: ChatResponse {
                answer: Some(answer),
                sql: Some(sql),
                results,
                execution_time,
                follow_ups,
                error,
            },
            record_history: true,
        })
    }

    /// Feeds the database error back to the model up to `max_sql_retries`
    /// times. Returns the corrected SQL when one of them succeeds, along with
    /// the last result.
    async fn retry(
        &self,
        question: &str,
        context: &str,
        failed_sql: &str,
        failure: QueryResult,
    ) -> (Option<String>, QueryResult) {
        let mut failed_sql = failed_sql.to_string();
        let mut result = failure;

        for attempt in 1..=self.options.max_sql_retries {
            let error = result.error.clone().unwrap_or_default();
            info!(attempt, error = %error, "Retrying SQL with error feedback");

            let candidate = self
                .generator
                .retry_sql(question, context, &failed_sql, &error)
                .await;
            enter(PipelineStage::RetryGenerated);
            if !candidate.is_executable() {
                debug!(
                    error = ?candidate.error,
                    raw = %candidate.raw_response,
                    "Retry produced no executable SQL"
                );
                break;
            }

            result = self.executor.execute(&candidate.sql).await;
            enter(PipelineStage::RetryExecuted);
            if result.success {
                return (Some(candidate.sql), result);
            }
            failed_sql = candidate.sql;
        }

        (None, result)
    }
}
