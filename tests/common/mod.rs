//! In-process fakes for the warehouse and the model.

#![allow(dead_code)]

use async_trait::async_trait;
use nl2sql::{LlmProvider, Nl2SqlError, QueryOutput, Result, Warehouse};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const METADATA_COLUMNS: [&str; 7] = [
    "table_catalog",
    "table_schema",
    "table_name",
    "column_name",
    "data_type",
    "column_comment",
    "table_comment",
];

/// Warehouse over a fixed `main.sales` schema with `products` and
/// `order_items`. Dry runs fail for statements containing a registered
/// fragment; executions return `result`.
pub struct FakeWarehouse {
    failing: Mutex<Vec<(String, String)>>,
    result: QueryOutput,
    statements: Mutex<Vec<String>>,
    metadata_loads: AtomicUsize,
}

impl FakeWarehouse {
    pub fn new(result: QueryOutput) -> Self {
        Self {
            failing: Mutex::new(Vec::new()),
            result,
            statements: Mutex::new(Vec::new()),
            metadata_loads: AtomicUsize::new(0),
        }
    }

    /// Make dry runs of statements containing `fragment` fail with `message`.
    pub fn fail_dry_run(self, fragment: &str, message: &str) -> Self {
        self.failing
            .lock()
            .unwrap()
            .push((fragment.to_string(), message.to_string()));
        self
    }

    /// Statements other than metadata loads, in submission order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Executed (non-EXPLAIN) statements.
    pub fn executed(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !s.starts_with("EXPLAIN"))
            .collect()
    }

    pub fn metadata_loads(&self) -> usize {
        self.metadata_loads.load(Ordering::SeqCst)
    }
}

fn metadata_row(table: &str, column: &str, data_type: &str, comment: Option<&str>) -> Vec<Value> {
    vec![
        json!("main"),
        json!("sales"),
        json!(table),
        json!(column),
        json!(data_type),
        comment.map(|c| json!(c)).unwrap_or(Value::Null),
        Value::Null,
    ]
}

fn metadata_output() -> QueryOutput {
    QueryOutput::new(
        METADATA_COLUMNS.iter().map(|c| c.to_string()).collect(),
        vec![
            metadata_row("products", "id", "INT", Some("product id")),
            metadata_row("products", "name", "STRING", Some("product name")),
            metadata_row("order_items", "id", "BIGINT", None),
            metadata_row("order_items", "product_id", "INT", None),
            metadata_row("order_items", "line_revenue", "DECIMAL(18,2)", None),
            metadata_row("order_items", "order_date", "DATE", None),
        ],
    )
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn query(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryOutput> {
        if sql.contains("information_schema") {
            self.metadata_loads.fetch_add(1, Ordering::SeqCst);
            return Ok(metadata_output());
        }
        self.statements.lock().unwrap().push(sql.to_string());

        if sql.starts_with("EXPLAIN") {
            let failing = self.failing.lock().unwrap();
            if let Some((_, message)) = failing.iter().find(|(fragment, _)| sql.contains(fragment)) {
                return Err(Nl2SqlError::Warehouse(message.clone()));
            }
            return Ok(QueryOutput::new(
                vec!["plan".to_string()],
                vec![vec![json!("== Physical Plan ==\nAdaptiveSparkPlan")]],
            ));
        }

        let mut output = self.result.clone();
        if let Some(limit) = row_limit {
            output.rows.truncate(limit);
        }
        Ok(output)
    }
}

/// Model that answers with queued replies and records every prompt.
pub struct ScriptedLlm {
    replies: Mutex<Vec<Result<Value>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Value>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(replies: Vec<Result<Value>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<Value> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(Nl2SqlError::Llm("no scripted reply left".to_string()));
        }
        replies.remove(0)
    }
}

pub fn top_products_output() -> QueryOutput {
    QueryOutput::new(
        vec!["name".to_string(), "total_revenue".to_string()],
        vec![
            vec![json!("Widget"), json!(1200.5)],
            vec![json!("Gadget"), json!(950.0)],
            vec![json!("Doohickey"), json!(300.25)],
        ],
    )
}

pub const BROKEN_SQL: &str = "SELECT p.name, SUM(oi.revenue) AS total_revenue\n\
FROM main.sales.order_items oi\n\
JOIN main.sales.products p ON oi.product_id = p.id\n\
GROUP BY p.name\n\
ORDER BY total_revenue DESC\n\
LIMIT 5";

pub const FIXED_SQL: &str = "SELECT p.name, SUM(oi.line_revenue) AS total_revenue\n\
FROM main.sales.order_items oi\n\
JOIN main.sales.products p ON oi.product_id = p.id\n\
GROUP BY p.name\n\
ORDER BY total_revenue DESC\n\
LIMIT 5";

pub fn plan_reply(sql: &str, fields: &[&str]) -> Value {
    json!({
        "sql": sql,
        "fields_used": fields,
        "assumptions": "Last quarter is the previous calendar quarter."
    })
}
