//! nl2sql
//!
//! Schema-aware natural-language-to-SQL assistant for a Databricks SQL
//! warehouse. A question is matched against catalog metadata, an LLM drafts a
//! single read-only statement, and the statement is gated, dry-run and executed,
//! with model-assisted repair on failure. A chart type and axes are picked from
//! the result shape.
//!
//! ```text
//! question -> Planner (catalog + condenser + synonyms + prompt + LLM)
//!          -> RepairLoop (guard -> dry run -> execute, regenerate on failure)
//!          -> chart selection -> AskResponse
//! ```

pub mod assistant;
pub mod cache;
pub mod chart;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod planner;
pub mod schema;
pub mod sql;
pub mod warehouse;

pub use assistant::{format_answer_summary, Assistant, AssistantOptions};
pub use cache::TtlCache;
pub use chart::{select_chart, AxisSpec, ChartChoice, ChartPreference, ChartType};
pub use config::{LlmProviderKind, Settings};
pub use error::{Nl2SqlError, Result};
pub use llm::{LlmGateway, LlmProvider};
pub use models::{AskEvent, AskRequest, AskResponse, ChartPayload, SchemaResponse};
pub use planner::{PlanResult, Planner};
pub use schema::{CatalogReader, Column, Table};
pub use sql::{ensure_select_only, DryRunValidator, Executor, RepairLoop, RepairOutcome, Row};
pub use warehouse::{BoundedWarehouse, DatabricksWarehouse, QueryOutput, Warehouse};
