//! Request, response and audit types exchanged with callers of the assistant.

use crate::chart::{AxisSpec, ChartChoice, ChartPreference, ChartType};
use crate::schema::condenser::DEFAULT_TOP_K_TABLES;
use crate::schema::Column;
use crate::sql::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub chart_preference: ChartPreference,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K_TABLES
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            chart_preference: ChartPreference::Auto,
            top_k: DEFAULT_TOP_K_TABLES,
        }
    }

    pub fn with_chart_preference(mut self, preference: ChartPreference) -> Self {
        self.chart_preference = preference;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Key for the question cache. Field order is fixed by the struct, so equal
    /// requests serialize identically.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.question.clone())
    }
}

/// Chart decision without the rendered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPayload {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub spec: AxisSpec,
}

impl From<ChartChoice> for ChartPayload {
    fn from(choice: ChartChoice) -> Self {
        Self {
            chart_type: choice.chart_type,
            spec: choice.spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer_text: String,
    pub sql: String,
    pub fields_used: Vec<String>,
    pub sampled_rows: Vec<Row>,
    pub chart: Option<ChartPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub col: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub full_name: String,
    pub columns: Vec<Column>,
    pub pk: Vec<String>,
    pub fk: Vec<ForeignKey>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub tables: Vec<SchemaTable>,
    pub synonyms: BTreeMap<String, String>,
}

/// Audit record for one answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub tables_considered: Vec<String>,
    pub final_sql: String,
    pub row_count: usize,
    pub attempts: usize,
}

impl AskEvent {
    pub fn new(
        question: &str,
        tables_considered: Vec<String>,
        final_sql: &str,
        row_count: usize,
        attempts: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            tables_considered,
            final_sql: final_sql.to_string(),
            row_count,
            attempts,
        }
    }
}
