//! Schema Context Condenser
//!
//! Ranks tables against the question and renders the top ones as the compact
//! schema text shown to the model.

use crate::schema::catalog::{derive_pk_fk, humanize, Table};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K_TABLES: usize = 12;
pub const DEFAULT_MAX_COLUMNS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondensedContext {
    pub text: String,
    /// Selected full names in score order.
    pub tables: Vec<String>,
}

/// +3 when the table name appears in the question, +1 for the schema name,
/// +1 per column name. `question_lower` must already be lower-cased.
pub fn score_table(table: &Table, question_lower: &str) -> usize {
    let mut score = 0;
    if question_lower.contains(&table.name.to_lowercase()) {
        score += 3;
    }
    if question_lower.contains(&table.schema.to_lowercase()) {
        score += 1;
    }
    score += table
        .columns
        .iter()
        .filter(|c| question_lower.contains(&c.name.to_lowercase()))
        .count();
    score
}

/// Select the `top_k_tables` best-scoring tables (ties keep catalog order) and
/// render a header per table plus column lines. `max_columns` is shared by all
/// selected tables; once spent, later tables get their header only.
pub fn build_condensed_context(
    tables: &[Table],
    question: &str,
    top_k_tables: usize,
    max_columns: usize,
) -> CondensedContext {
    let question_lower = question.to_lowercase();
    let selected: Vec<&Table> = tables
        .iter()
        .map(|table| (score_table(table, &question_lower), table))
        .sorted_by(|a, b| b.0.cmp(&a.0))
        .take(top_k_tables)
        .map(|(_, table)| table)
        .collect();

    let mut lines = Vec::new();
    let mut included_columns = 0;
    for table in &selected {
        lines.push(table_header(table));
        for column in &table.columns {
            if included_columns >= max_columns {
                break;
            }
            let description = column
                .comment
                .clone()
                .unwrap_or_else(|| humanize(&column.name));
            lines.push(format!("- {} ({}): {}", column.name, column.data_type, description));
            included_columns += 1;
        }
    }

    CondensedContext {
        text: lines.join("\n"),
        tables: selected.iter().map(|t| t.full_name()).collect(),
    }
}

fn table_header(table: &Table) -> String {
    let hints = derive_pk_fk(table);
    let mut parts = vec![format!("Table {}", table.full_name())];
    if !hints.pk.is_empty() {
        parts.push(format!("PK: {}", hints.pk.join(", ")));
    }
    if !hints.fk.is_empty() {
        parts.push(format!("FK hints: {}", hints.fk.iter().join(", ")));
    }
    parts.join(" ")
}
