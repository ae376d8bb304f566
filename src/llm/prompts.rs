//! Prompt Builder
//!
//! Pure string assembly for the planning and repair prompts. Both ask for a
//! single JSON object `{"sql", "fields_used", "assumptions"}` and nothing else.

use itertools::Itertools;
use std::collections::BTreeMap;

/// One worked question -> schema -> SQL example shown to the model.
#[derive(Debug, Clone, Copy)]
pub struct FewShot {
    pub question: &'static str,
    pub schema: &'static str,
    pub sql: &'static str,
}

pub const FEW_SHOTS: [FewShot; 3] = [
    FewShot {
        question: "How many new customers signed up last month?",
        schema: "Table sales.customers PK: id\n\
                 - id (INT): customer id\n\
                 - signup_date (DATE): signup date\n\
                 - plan (STRING): product plan",
        sql: "SELECT DATE_TRUNC('month', signup_date) AS month, COUNT(*) AS new_customers\n\
              FROM sales.customers\n\
              WHERE signup_date >= DATE_TRUNC('month', CURRENT_DATE - INTERVAL 1 MONTH)\n  \
              AND signup_date < DATE_TRUNC('month', CURRENT_DATE)\n\
              GROUP BY 1",
    },
    FewShot {
        question: "Show top 5 products by revenue last quarter",
        schema: "Table sales.order_items\n\
                 - product_id (INT): product identifier\n\
                 - revenue (DECIMAL): revenue per line\n\
                 Table sales.products\n\
                 - id (INT): product id\n\
                 - name (STRING): product name",
        sql: "SELECT p.name, SUM(oi.revenue) AS total_revenue\n\
              FROM sales.order_items oi\n\
              JOIN sales.products p ON oi.product_id = p.id\n\
              WHERE oi.order_date >= DATE_TRUNC('quarter', CURRENT_DATE - INTERVAL 1 QUARTER)\n  \
              AND oi.order_date < DATE_TRUNC('quarter', CURRENT_DATE)\n\
              GROUP BY p.name\n\
              ORDER BY total_revenue DESC\n\
              LIMIT 5",
    },
    FewShot {
        question: "Compare ARR by region",
        schema: "Table finance.revenue\n\
                 - region (STRING): customer region\n\
                 - arr (DOUBLE): annual recurring revenue",
        sql: "SELECT region, SUM(arr) AS total_arr\n\
              FROM finance.revenue\n\
              GROUP BY region\n\
              ORDER BY total_arr DESC",
    },
];

const RESPONSE_CONTRACT: &str =
    r#"{"sql": "...", "fields_used": ["table.column", ...], "assumptions": "..."}"#;

/// The planning rule list, one `- ` bullet per line.
pub fn planning_rules(max_rows: usize) -> String {
    [
        "- Single SELECT statement only.".to_string(),
        "- No CREATE/ALTER/DROP/DELETE/UPDATE/INSERT statements.".to_string(),
        "- Use fully qualified table names when ambiguity exists.".to_string(),
        "- Infer reasonable date filters when the question implies a period.".to_string(),
        format!("- Apply LIMIT {} for row-level outputs.", max_rows),
    ]
    .join("\n")
}

fn render_few_shots() -> String {
    FEW_SHOTS
        .iter()
        .map(|shot| {
            format!(
                "Question: {}\nSchema:\n{}\nSQL:\n{}",
                shot.question, shot.schema, shot.sql
            )
        })
        .join("\n\n")
}

fn render_synonyms(synonyms: &BTreeMap<String, String>) -> String {
    if synonyms.is_empty() {
        return "(none)".to_string();
    }
    synonyms
        .iter()
        .map(|(alias, canonical)| format!("{} -> {}", alias, canonical))
        .join("\n")
}

pub fn planner_prompt(
    question: &str,
    schema_context: &str,
    synonyms: &BTreeMap<String, String>,
    rules: &str,
    max_rows: usize,
) -> String {
    format!(
        "You are a senior analytics engineer. Convert the user's question into a single \
SELECT-only SQL query for Databricks.
Follow these rules strictly:
{rules}
Always respond with valid JSON only: {contract}.
Do not include markdown.

Synonyms:
{synonyms}

Condensed schema context:
{schema_context}

Examples:
{examples}

User question: {question}

Remember to cap row-level outputs with LIMIT {max_rows} when the query would otherwise return many rows.",
        rules = rules,
        contract = RESPONSE_CONTRACT,
        synonyms = render_synonyms(synonyms),
        schema_context = schema_context,
        examples = render_few_shots(),
        question = question,
        max_rows = max_rows,
    )
}

/// Ask for a revision of `previous_sql` given the warehouse's own error text.
pub fn repair_prompt(
    question: &str,
    schema_context: &str,
    error_message: &str,
    previous_sql: &str,
    max_rows: usize,
) -> String {
    format!(
        "The previous SQL failed with the following Databricks error:
{error_message}

Please revise the SQL while respecting all original constraints:
- Single SELECT statement only.
- No DDL/DML or mutations.
- Prefer aggregates, include LIMIT {max_rows} when many rows could return.
- Maintain consistent field naming if possible.

Schema context:
{schema_context}

Original question: {question}
Previous SQL: {previous_sql}

Respond with strict JSON: {contract}. Do not include markdown.",
        error_message = error_message,
        max_rows = max_rows,
        schema_context = schema_context,
        question = question,
        previous_sql = previous_sql,
        contract = RESPONSE_CONTRACT,
    )
}
