//! Planner
//!
//! Turns a question into a candidate SQL statement: condense the schema,
//! resolve aliases, add verbatim column hints, prompt the model and validate
//! the shape of its reply. SQL safety is not checked here; the repair loop
//! owns that.

use crate::error::{Nl2SqlError, Result};
use crate::llm::prompts::{planner_prompt, planning_rules};
use crate::llm::LlmGateway;
use crate::schema::condenser::{build_condensed_context, DEFAULT_MAX_COLUMNS};
use crate::schema::{resolve_synonyms, surface_relevant_columns, CatalogReader};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const JSON_REMINDER: &str = "Respond ONLY with JSON.";

/// A drafted statement plus what the model claims about it. `sql` is untrusted
/// and `fields_used` is advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub sql: String,
    pub fields_used: Vec<String>,
    pub assumptions: String,
    pub tables_considered: Vec<String>,
    /// Exact schema text shown to the model, reused by repair prompts.
    pub schema_context: String,
}

pub struct Planner {
    llm: Arc<LlmGateway>,
    catalog: Arc<CatalogReader>,
    max_rows: usize,
}

impl Planner {
    pub fn new(llm: Arc<LlmGateway>, catalog: Arc<CatalogReader>, max_rows: usize) -> Self {
        Self {
            llm,
            catalog,
            max_rows,
        }
    }

    pub async fn build_plan(&self, question: &str, top_k: usize) -> Result<PlanResult> {
        let tables = self.catalog.get_tables().await?;
        let condensed = build_condensed_context(&tables, question, top_k, DEFAULT_MAX_COLUMNS);
        let synonyms = resolve_synonyms(question);

        let hints = surface_relevant_columns(question, &tables);
        let schema_context = if hints.is_empty() {
            condensed.text
        } else {
            let hint_lines = hints
                .iter()
                .map(|(table, column)| format!("Hint: {}.{}", table, column))
                .join("\n");
            format!("{}\n{}", condensed.text, hint_lines)
        };

        info!(
            "Planning question over {} table(s), {} synonym(s), {} column hint(s)",
            condensed.tables.len(),
            synonyms.len(),
            hints.len()
        );

        let prompt = planner_prompt(
            question,
            &schema_context,
            &synonyms,
            &planning_rules(self.max_rows),
            self.max_rows,
        );
        let reply = self.llm.complete_json(&prompt, JSON_REMINDER).await?;
        debug!("Planner reply: {}", reply);

        let sql = reply
            .get("sql")
            .and_then(Value::as_str)
            .ok_or_else(|| Nl2SqlError::ModelFormat("LLM response missing SQL".to_string()))?
            .trim()
            .to_string();

        Ok(PlanResult {
            sql,
            fields_used: coerce_fields(reply.get("fields_used")).unwrap_or_default(),
            assumptions: reply
                .get("assumptions")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tables_considered: condensed.tables,
            schema_context,
        })
    }
}

/// `fields_used` as a list of strings, or `None` when the model sent anything
/// other than a list. Non-string list entries are dropped.
pub(crate) fn coerce_fields(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}
