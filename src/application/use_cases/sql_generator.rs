use super::prompt_templates::{
    answer_system_prompt, build_answer_prompt, build_follow_up_prompt,
    build_generation_system_prompt, build_question_prompt, build_retry_prompt,
    build_sql_system_prompt, follow_up_system_prompt,
};
use super::sql_guard::validate_generated_sql;
use crate::domain::llm_config::LLMConfig;
use crate::domain::query::{QueryResult, SqlCandidate};
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::{clean_llm_response, extract_sql, parse_follow_ups};
use std::sync::Arc;
use tracing::{debug, warn};

const SQL_TEMPERATURE: f64 = 0.1;
const SQL_MAX_TOKENS: u32 = 1024;
const ANSWER_TEMPERATURE: f64 = 0.5;
const ANSWER_MAX_TOKENS: u32 = 512;
const FOLLOW_UP_TEMPERATURE: f64 = 0.7;
const FOLLOW_UP_MAX_TOKENS: u32 = 256;
const FOLLOW_UP_MIN_LEN: usize = 10;
const FOLLOW_UP_LIMIT: usize = 3;

/// Turns questions into SQL and query results into prose.
///
/// Every operation absorbs model failures into its return value so the chat
/// pipeline never has to handle a transport error itself.
pub struct SqlGenerator {
    llm_client: Arc<dyn LLMClient>,
    config: LLMConfig,
    answer_row_limit: usize,
}

impl SqlGenerator {
    pub fn new(llm_client: Arc<dyn LLMClient>, config: LLMConfig, answer_row_limit: usize) -> Self {
        Self {
            llm_client,
            config,
            answer_row_limit,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn generate_sql(&self, question: &str, schema_context: &str) -> SqlCandidate {
        let system = build_generation_system_prompt(schema_context);
        let user = build_question_prompt(question);
        let config = self.config.with_sampling(SQL_TEMPERATURE, SQL_MAX_TOKENS);

        match self.llm_client.generate(&config, &system, &user).await {
            Ok(raw) => Self::candidate_from(raw),
            Err(e) => {
                warn!(error = %e, "SQL generation call failed");
                SqlCandidate::failed(format!("LLM error: {}", e.detail()))
            }
        }
    }

    /// Asks for a corrected statement given the database error.
    pub async fn retry_sql(
        &self,
        question: &str,
        schema_context: &str,
        failed_sql: &str,
        error: &str,
    ) -> SqlCandidate {
        let system = build_sql_system_prompt(schema_context);
        let user = build_retry_prompt(question, failed_sql, error);
        let config = self.config.with_sampling(SQL_TEMPERATURE, SQL_MAX_TOKENS);

        match self.llm_client.generate(&config, &system, &user).await {
            Ok(raw) => Self::candidate_from(raw),
            Err(e) => {
                warn!(error = %e, "SQL retry call failed");
                SqlCandidate::failed(format!("LLM retry error: {}", e.detail()))
            }
        }
    }

    fn candidate_from(raw_response: String) -> SqlCandidate {
        let sql = extract_sql(&raw_response);
        let verdict = validate_generated_sql(&sql);
        debug!(sql = %sql, valid = verdict.is_valid, "Extracted SQL");

        SqlCandidate {
            error: verdict.first_error().map(str::to_string),
            is_valid: verdict.is_valid,
            sql,
            raw_response,
        }
    }

    pub async fn generate_answer(&self, question: &str, sql: &str, result: &QueryResult) -> String {
        let user = build_answer_prompt(question, sql, result, self.answer_row_limit);
        let config = self
            .config
            .with_sampling(ANSWER_TEMPERATURE, ANSWER_MAX_TOKENS);

        match self
            .llm_client
            .generate(&config, answer_system_prompt(), &user)
            .await
        {
            Ok(raw) => clean_llm_response(&raw),
            Err(e) => {
                warn!(error = %e, "Answer synthesis failed");
                format!(
                    "I found the results but couldn't generate a summary: {}",
                    e.detail()
                )
            }
        }
    }

    /// Up to three suggested next questions; empty on any failure.
    pub async fn generate_follow_ups(&self, question: &str, answer: &str) -> Vec<String> {
        let user = build_follow_up_prompt(question, answer);
        let config = self
            .config
            .with_sampling(FOLLOW_UP_TEMPERATURE, FOLLOW_UP_MAX_TOKENS);

        match self
            .llm_client
            .generate(&config, follow_up_system_prompt(), &user)
            .await
        {
            Ok(raw) => parse_follow_ups(&raw, FOLLOW_UP_MIN_LEN, FOLLOW_UP_LIMIT),
            Err(e) => {
                debug!(error = %e, "Follow-up suggestions unavailable");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::test_support::ScriptedLlm;
    use crate::domain::error::AppError;

    fn generator(llm: Arc<ScriptedLlm>) -> SqlGenerator {
        SqlGenerator::new(llm, LLMConfig::default(), 20)
    }

    #[tokio::test]
    async fn test_generate_sql_extracts_fenced_statement() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "Here you go:\n```sql\nSELECT COUNT(*) AS total_customers FROM customers\n```",
        ]));
        let candidate = generator(llm.clone())
            .generate_sql("How many customers are there?", "Table: customers")
            .await;

        assert!(candidate.is_valid);
        assert_eq!(candidate.sql, "SELECT COUNT(*) AS total_customers FROM customers;");
        assert!(candidate.error.is_none());

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, Some(0.1));
        assert_eq!(calls[0].max_tokens, Some(1024));
        assert!(calls[0].system.contains("Table: customers"));
        assert!(calls[0].system.contains("## EXAMPLES:"));
        assert_eq!(calls[0].user, "Question: How many customers are there?\nSQL:");
    }

    #[tokio::test]
    async fn test_generate_sql_rejects_mutation() {
        let llm = Arc::new(ScriptedLlm::replying(&["DELETE FROM customers;"]));
        let candidate = generator(llm).generate_sql("wipe it", "").await;
        assert!(!candidate.is_valid);
        assert_eq!(
            candidate.error.as_deref(),
            Some("Blocked: SQL contains 'DELETE' which is not allowed.")
        );
        assert!(!candidate.is_executable());
        assert_eq!(candidate.raw_response, "DELETE FROM customers;");
    }

    #[tokio::test]
    async fn test_generate_sql_absorbs_transport_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(AppError::LLMError(
            "rate limited".into(),
        ))]));
        let candidate = generator(llm).generate_sql("q", "").await;
        assert!(!candidate.is_valid);
        assert!(candidate.sql.is_empty());
        assert_eq!(candidate.error.as_deref(), Some("LLM error: rate limited"));
    }

    #[tokio::test]
    async fn test_retry_sql_sends_error_feedback() {
        let llm = Arc::new(ScriptedLlm::replying(&["SELECT company FROM customers"]));
        let candidate = generator(llm.clone())
            .retry_sql(
                "List customers",
                "Table: customers",
                "SELECT company_name FROM customers;",
                "no such column: company_name",
            )
            .await;

        assert!(candidate.is_valid);
        assert_eq!(candidate.sql, "SELECT company FROM customers;");
        let call = &llm.calls()[0];
        assert!(!call.system.contains("## EXAMPLES:"));
        assert!(call.user.contains("no such column: company_name"));
        assert!(call.user.contains("SELECT company_name FROM customers;"));
    }

    #[tokio::test]
    async fn test_retry_sql_error_prefix() {
        let llm = Arc::new(ScriptedLlm::default());
        let candidate = generator(llm).retry_sql("q", "", "SELECT 1;", "boom").await;
        assert_eq!(
            candidate.error.as_deref(),
            Some("LLM retry error: no scripted reply left")
        );
    }

    #[tokio::test]
    async fn test_answer_uses_answer_sampling() {
        let llm = Arc::new(ScriptedLlm::replying(&["<think>count</think>There are 3 customers."]));
        let result = QueryResult::success(vec!["total".into()], vec![]);
        let answer = generator(llm.clone())
            .generate_answer("How many?", "SELECT 3 AS total;", &result)
            .await;

        assert_eq!(answer, "There are 3 customers.");
        let call = &llm.calls()[0];
        assert_eq!(call.temperature, Some(0.5));
        assert_eq!(call.max_tokens, Some(512));
        assert!(call.user.contains("(No results found)"));
    }

    #[tokio::test]
    async fn test_answer_failure_message() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(AppError::LLMError("timeout".into()))]));
        let result = QueryResult::success(vec![], vec![]);
        let answer = generator(llm).generate_answer("q", "SELECT 1;", &result).await;
        assert_eq!(answer, "I found the results but couldn't generate a summary: timeout");
    }

    #[tokio::test]
    async fn test_follow_ups_are_cleaned_and_capped() {
        let llm = Arc::new(ScriptedLlm::replying(&[
            "1. Which city has the most customers?\n2. Ok?\n3. What is the average list price?\n\
             4. How many orders shipped in 2006?\n5. Which employee sold the most?",
        ]));
        let follow_ups = generator(llm)
            .generate_follow_ups("How many customers?", "There are 3.")
            .await;
        assert_eq!(
            follow_ups,
            vec![
                "Which city has the most customers?",
                "What is the average list price?",
                "How many orders shipped in 2006?",
            ]
        );
    }

    #[tokio::test]
    async fn test_follow_ups_swallow_errors() {
        let llm = Arc::new(ScriptedLlm::default());
        assert!(generator(llm).generate_follow_ups("q", "a").await.is_empty());
    }
}
