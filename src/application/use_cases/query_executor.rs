use super::sql_guard::{apply_row_limit, validate_executable_sql, BLOCKED_QUERY_MESSAGE};
use crate::domain::query::QueryResult;
use crate::infrastructure::db::SqlDatabase;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs read-only statements with an implicit row cap.
pub struct QueryExecutor {
    db: Arc<dyn SqlDatabase>,
    row_limit: u32,
}

impl QueryExecutor {
    pub fn new(db: Arc<dyn SqlDatabase>, row_limit: u32) -> Self {
        Self { db, row_limit }
    }

    pub fn database(&self) -> &Arc<dyn SqlDatabase> {
        &self.db
    }

    /// Never fails: guard rejections and driver errors come back as an
    /// unsuccessful result.
    pub async fn execute(&self, sql: &str) -> QueryResult {
        let dialect = self.db.dialect();
        let verdict = validate_executable_sql(sql, dialect);
        if !verdict.is_valid {
            warn!(errors = ?verdict.errors, "Query blocked");
            return QueryResult::failure(BLOCKED_QUERY_MESSAGE);
        }

        let capped = apply_row_limit(sql, self.row_limit, dialect);
        debug!(sql = %capped, "Executing query");

        match self.db.fetch_rows(&capped).await {
            Ok(set) => {
                debug!(rows = set.rows.len(), "Query succeeded");
                QueryResult::success(set.columns, set.rows)
            }
            Err(e) => {
                warn!(error = %e, "Query failed");
                QueryResult::failure(e.detail())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::test_support::seeded_database;

    async fn executor(row_limit: u32) -> QueryExecutor {
        QueryExecutor::new(Arc::new(seeded_database().await), row_limit)
    }

    #[tokio::test]
    async fn test_count_query() {
        let result = executor(50)
            .await
            .execute("SELECT COUNT(*) AS total_customers FROM customers;")
            .await;
        assert!(result.success);
        assert_eq!(result.columns, vec!["total_customers"]);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0]["total_customers"], 3);
    }

    #[tokio::test]
    async fn test_row_cap_applied() {
        let result = executor(2)
            .await
            .execute("SELECT id FROM customers ORDER BY id")
            .await;
        assert!(result.success);
        assert_eq!(result.row_count, 2);
    }

    #[tokio::test]
    async fn test_explicit_limit_kept() {
        let result = executor(2)
            .await
            .execute("SELECT id FROM customers LIMIT 1;")
            .await;
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_mutation_blocked() {
        let exec = executor(50).await;
        let result = exec.execute("DELETE FROM customers").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(BLOCKED_QUERY_MESSAGE));

        let still_there = exec.execute("SELECT COUNT(*) AS n FROM customers").await;
        assert_eq!(still_there.rows[0]["n"], 3);
    }

    #[tokio::test]
    async fn test_stacked_statement_blocked() {
        let result = executor(50)
            .await
            .execute("SELECT 1; SELECT 2")
            .await;
        assert_eq!(result.error.as_deref(), Some(BLOCKED_QUERY_MESSAGE));
    }

    #[tokio::test]
    async fn test_backslash_literal_cannot_smuggle_statement() {
        let exec = executor(50).await;
        let result = exec
            .execute(r"SELECT '\'; PRAGMA user_version = 7; SELECT 'x';")
            .await;
        assert_eq!(result.error.as_deref(), Some(BLOCKED_QUERY_MESSAGE));

        let hidden_delete = exec
            .execute(r"WITH x AS (SELECT '\') DELETE FROM customers WHERE 'a' = 'a'")
            .await;
        assert_eq!(hidden_delete.error.as_deref(), Some(BLOCKED_QUERY_MESSAGE));

        let version = exec
            .execute("SELECT user_version AS v FROM pragma_user_version")
            .await;
        assert!(version.success, "{:?}", version.error);
        assert_eq!(version.rows[0]["v"], 0);

        let customers = exec.execute("SELECT COUNT(*) AS n FROM customers").await;
        assert_eq!(customers.rows[0]["n"], 3);
    }

    #[tokio::test]
    async fn test_keyword_inside_literal_allowed() {
        let result = executor(50)
            .await
            .execute("SELECT company FROM customers WHERE company = 'DROP ZONE'")
            .await;
        assert!(result.success);
        assert_eq!(result.row_count, 0);
        assert_eq!(result.columns, vec!["company"]);
    }

    #[tokio::test]
    async fn test_driver_error_surfaces_message() {
        let result = executor(50)
            .await
            .execute("SELECT company_name FROM customers")
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("company_name"));
        assert!(result.columns.is_empty());
    }
}
