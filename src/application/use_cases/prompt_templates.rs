//! Prompt text for SQL generation, answer synthesis and follow-up suggestions.

use crate::domain::query::QueryResult;

const SQL_SYSTEM_PROMPT: &str = r#"You are an expert SQL query generator for a MySQL database called "northwind".
Your job is to convert natural language questions into accurate, efficient SQL queries.

## CRITICAL — EXACT TABLE AND COLUMN NAMES:
This is the dalers/mywind version of Northwind. Use ONLY these exact names:

### customers
  id, company, last_name, first_name, email_address, job_title,
  business_phone, home_phone, mobile_phone, fax_number,
  address, city, state_province, zip_postal_code, country_region, web_page, notes, attachments

### employees
  id, company, last_name, first_name, email_address, job_title,
  business_phone, home_phone, mobile_phone, fax_number,
  address, city, state_province, zip_postal_code, country_region, web_page, notes, attachments

### orders
  id, employee_id, customer_id, order_date, shipped_date, shipper_id,
  ship_name, ship_address, ship_city, ship_state_province,
  ship_zip_postal_code, ship_country_region, shipping_fee,
  taxes, payment_type, paid_date, notes, tax_rate, tax_status_id, status_id

### order_details
  id, order_id, product_id, quantity, unit_price, discount, status_id,
  date_allocated, purchase_order_id, inventory_id

### products
  id, product_code, product_name, description, standard_cost, list_price,
  reorder_level, target_level, quantity_per_unit, discontinued,
  minimum_reorder_quantity, category, attachments

### shippers
  id, company, last_name, first_name, email_address, job_title,
  business_phone, home_phone, mobile_phone, fax_number,
  address, city, state_province, zip_postal_code, country_region, web_page, notes, attachments

### suppliers
  id, company, last_name, first_name, email_address, job_title,
  business_phone, home_phone, mobile_phone, fax_number,
  address, city, state_province, zip_postal_code, country_region, web_page, notes, attachments

### Other tables: inventory_transactions, invoices, order_details_status,
### orders_status, orders_tax_status, privileges, purchase_orders,
### purchase_order_details, purchase_order_status, sales_reports, strings

## KEY NOTES:
- The "orders" table has NO "required_date" column. Only "order_date" and "shipped_date".
- Customer/supplier names use "company" (NOT "company_name").
- Product names use "product_name". Product prices use "list_price" and "standard_cost".
- Use "shipping_fee" for order shipping costs (NOT "freight").
- order_details has "unit_price" and "quantity" for calculating revenue.
- Revenue = SUM(od.quantity * od.unit_price * (1 - od.discount))

## RULES:
1. Generate ONLY valid MySQL SELECT queries. Never write INSERT, UPDATE, DELETE, DROP, or any data-modifying statements.
2. Always use the EXACT table and column names listed above. NEVER guess or invent column names.
3. Use proper JOINs when the question involves multiple tables.
4. Use aliases for readability (e.g., `c` for `customers`, `o` for `orders`).
5. Add appropriate WHERE, GROUP BY, ORDER BY, and LIMIT clauses as needed.
6. For aggregations, always include meaningful column aliases (e.g., `AS total_revenue`).
7. If the question is ambiguous, make a reasonable assumption.
8. Return ONLY the SQL query: no explanations, no markdown code blocks, just raw SQL.

## DATABASE SCHEMA CONTEXT (from RAG):
"#;

const FEW_SHOT_EXAMPLES: &str = r#"
## EXAMPLES:

Question: How many customers are there?
SQL: SELECT COUNT(*) AS total_customers FROM customers;

Question: Show all products with their prices
SQL: SELECT product_name, list_price, standard_cost, category FROM products ORDER BY list_price DESC;

Question: Which employees processed the most orders?
SQL: SELECT e.first_name, e.last_name, COUNT(o.id) AS order_count FROM employees e JOIN orders o ON e.id = o.employee_id GROUP BY e.id, e.first_name, e.last_name ORDER BY order_count DESC;

Question: What are the top 5 customers by total spending?
SQL: SELECT c.company, CONCAT(c.first_name, ' ', c.last_name) AS contact_name, SUM(od.quantity * od.unit_price * (1 - od.discount)) AS total_spent FROM customers c JOIN orders o ON c.id = o.customer_id JOIN order_details od ON o.id = od.order_id GROUP BY c.id, c.company, c.first_name, c.last_name ORDER BY total_spent DESC LIMIT 5;

Question: Show orders with customer and employee names
SQL: SELECT o.id AS order_id, o.order_date, c.company AS customer, CONCAT(e.first_name, ' ', e.last_name) AS employee, o.shipping_fee FROM orders o LEFT JOIN customers c ON o.customer_id = c.id LEFT JOIN employees e ON o.employee_id = e.id ORDER BY o.order_date DESC;
"#;

const ANSWER_SYSTEM_PROMPT: &str = "You are a friendly data analyst assistant. Given a user's question, the SQL query that was executed, and the query results, provide a clear and concise natural language answer.

## RULES:
1. Summarize the results in plain English.
2. If the results include numbers, mention the key figures.
3. If there are multiple rows, highlight the most notable ones and mention the total count.
4. Be conversational but precise.
5. If the results are empty, say so clearly.
6. Keep your answer concise: 2-4 sentences for simple queries, a short paragraph for complex ones.
7. Format numbers nicely (e.g., use commas for large numbers, currency with $ signs).
8. Do NOT repeat the SQL query in your answer.
";

const FOLLOW_UP_SYSTEM_PROMPT: &str = "You suggest follow-up questions for a chat assistant that answers questions about the Northwind sales database (customers, employees, orders, order details, products, shippers, suppliers). Suggest exactly 3 short, specific questions the user could ask next. Return one question per line with no numbering, no bullets and no extra text.";

pub(crate) fn build_sql_system_prompt(schema_context: &str) -> String {
    format!("{}{}\n", SQL_SYSTEM_PROMPT, schema_context)
}

/// Initial generation adds the worked examples after the schema context.
pub(crate) fn build_generation_system_prompt(schema_context: &str) -> String {
    format!("{}\n{}", build_sql_system_prompt(schema_context), FEW_SHOT_EXAMPLES)
}

pub(crate) fn build_question_prompt(question: &str) -> String {
    format!("Question: {}\nSQL:", question)
}

pub(crate) fn build_retry_prompt(question: &str, failed_sql: &str, error: &str) -> String {
    format!(
        "The previous SQL query failed with the following error:\n{}\n\n\
         The failed query was:\n{}\n\n\
         Please fix the query using ONLY the exact column names from the schema. \
         Return ONLY the corrected SQL. Do not include any explanation.\n\n\
         Question: {}\nSQL:",
        error, failed_sql, question
    )
}

pub(crate) fn answer_system_prompt() -> &'static str {
    ANSWER_SYSTEM_PROMPT
}

pub(crate) fn build_answer_prompt(
    question: &str,
    sql: &str,
    result: &QueryResult,
    row_limit: usize,
) -> String {
    format!(
        "User Question: {}\n\nSQL Query Executed: {}\n\nQuery Results ({} rows):\n{}\n\n\
         Please provide a natural language answer:",
        question,
        sql,
        result.row_count,
        format_result_rows(result, row_limit)
    )
}

/// One JSON object per line, truncated to `row_limit` rows.
pub(crate) fn format_result_rows(result: &QueryResult, row_limit: usize) -> String {
    if result.rows.is_empty() {
        return "  (No results found)".to_string();
    }

    let mut body = String::new();
    for row in result.rows.iter().take(row_limit) {
        body.push_str("  ");
        body.push_str(&serde_json::Value::Object(row.clone()).to_string());
        body.push('\n');
    }
    if result.rows.len() > row_limit {
        body.push_str(&format!(
            "  ... and {} more rows\n",
            result.rows.len() - row_limit
        ));
    }
    body
}

pub(crate) fn follow_up_system_prompt() -> &'static str {
    FOLLOW_UP_SYSTEM_PROMPT
}

pub(crate) fn build_follow_up_prompt(question: &str, answer: &str) -> String {
    format!(
        "Previous question: {}\nAnswer given: {}\n\nThree follow-up questions:",
        question, answer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::Row;
    use serde_json::json;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i + 1));
                row.insert("company".into(), json!(format!("Company {}", i + 1)));
                row
            })
            .collect()
    }

    #[test]
    fn test_generation_prompt_embeds_context_then_examples() {
        let prompt = build_generation_system_prompt("Table: customers");
        let context_at = prompt.find("Table: customers").unwrap();
        let examples_at = prompt.find("## EXAMPLES:").unwrap();
        assert!(context_at < examples_at);
        assert!(prompt.contains("SELECT COUNT(*) AS total_customers FROM customers;"));
    }

    #[test]
    fn test_retry_system_prompt_has_no_examples() {
        let prompt = build_sql_system_prompt("Table: orders");
        assert!(prompt.ends_with("Table: orders\n"));
        assert!(!prompt.contains("## EXAMPLES:"));
    }

    #[test]
    fn test_retry_prompt_layout() {
        let prompt = build_retry_prompt("How many?", "SELECT nope;", "Unknown column 'nope'");
        assert!(prompt.starts_with(
            "The previous SQL query failed with the following error:\nUnknown column 'nope'\n\n"
        ));
        assert!(prompt.contains("The failed query was:\nSELECT nope;\n\n"));
        assert!(prompt.ends_with("Question: How many?\nSQL:"));
    }

    #[test]
    fn test_question_prompt() {
        assert_eq!(build_question_prompt("Hi?"), "Question: Hi?\nSQL:");
    }

    #[test]
    fn test_format_rows_empty() {
        let result = QueryResult::success(vec!["id".into()], vec![]);
        assert_eq!(format_result_rows(&result, 20), "  (No results found)");
    }

    #[test]
    fn test_format_rows_truncates() {
        let result = QueryResult::success(vec!["id".into(), "company".into()], rows(23));
        let text = format_result_rows(&result, 20);
        assert_eq!(text.lines().count(), 21);
        assert!(text.starts_with("  {\"id\":1,\"company\":\"Company 1\"}\n"));
        assert!(text.ends_with("  ... and 3 more rows\n"));
    }

    #[test]
    fn test_answer_prompt_reports_row_count() {
        let result = QueryResult::success(vec!["id".into(), "company".into()], rows(2));
        let prompt = build_answer_prompt("Which companies?", "SELECT id, company FROM customers;", &result, 20);
        assert!(prompt.contains("Query Results (2 rows):\n  {"));
        assert!(prompt.ends_with("Please provide a natural language answer:"));
    }
}
