//! Assistant
//!
//! Wires the catalog reader, planner, repair loop and chart selector into one
//! entry point. The schema snapshot and the question cache are created here
//! once and shared by every request.

use crate::cache::TtlCache;
use crate::chart::select_chart;
use crate::config::{
    Settings, DEFAULT_CACHE_TTL_SECS, DEFAULT_MAX_CONCURRENT_CALLS, DEFAULT_MAX_ROWS,
    DEFAULT_QUESTION_CACHE_TTL_SECS,
};
use crate::error::Result;
use crate::llm::{provider_from_settings, LlmGateway, LlmProvider};
use crate::models::{
    AskEvent, AskRequest, AskResponse, ChartPayload, ForeignKey, SchemaResponse, SchemaTable,
};
use crate::planner::{PlanResult, Planner};
use crate::schema::{default_synonyms, derive_pk_fk, CatalogReader};
use crate::sql::repair::{RepairLoop, DEFAULT_MAX_RETRIES};
use crate::sql::Row;
use crate::warehouse::{BoundedWarehouse, DatabricksWarehouse, Warehouse};
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub catalogs: Vec<String>,
    pub schemas: Vec<String>,
    pub max_rows: usize,
    pub schema_ttl: Duration,
    pub question_cache_ttl: Duration,
    pub max_concurrent_calls: usize,
    pub max_retries: usize,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            catalogs: Vec::new(),
            schemas: Vec::new(),
            max_rows: DEFAULT_MAX_ROWS,
            schema_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            question_cache_ttl: Duration::from_secs(DEFAULT_QUESTION_CACHE_TTL_SECS),
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl AssistantOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            catalogs: settings.default_catalogs.clone(),
            schemas: settings.default_schemas.clone(),
            max_rows: settings.max_rows,
            schema_ttl: settings.cache_ttl,
            question_cache_ttl: settings.question_cache_ttl,
            max_concurrent_calls: settings.max_concurrent_calls,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

pub struct Assistant {
    catalog: Arc<CatalogReader>,
    planner: Planner,
    repair: RepairLoop,
    question_cache: TtlCache<AskResponse>,
}

impl Assistant {
    /// Build an assistant over `provider` and `warehouse`. Both are wrapped in
    /// limiters allowing `options.max_concurrent_calls` calls each.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        warehouse: Arc<dyn Warehouse>,
        options: AssistantOptions,
    ) -> Self {
        let warehouse: Arc<dyn Warehouse> = Arc::new(BoundedWarehouse::new(
            warehouse,
            options.max_concurrent_calls,
        ));
        let llm = Arc::new(LlmGateway::new(provider, options.max_concurrent_calls));
        let catalog = Arc::new(CatalogReader::new(
            warehouse.clone(),
            options.catalogs,
            options.schemas,
            options.schema_ttl,
        ));

        Self {
            planner: Planner::new(llm.clone(), catalog.clone(), options.max_rows),
            repair: RepairLoop::new(llm, warehouse, options.max_rows)
                .with_max_retries(options.max_retries),
            catalog,
            question_cache: TtlCache::new(options.question_cache_ttl),
        }
    }

    /// Build the configured LLM provider and Databricks warehouse. Missing
    /// credentials fail here.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = provider_from_settings(settings)?;
        let warehouse = Arc::new(DatabricksWarehouse::from_settings(settings)?);
        Ok(Self::new(
            provider,
            warehouse,
            AssistantOptions::from_settings(settings),
        ))
    }

    /// Answer a question end to end. Identical requests within the question
    /// cache TTL are served from the cache without touching the model or the
    /// warehouse.
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        let key = request.cache_key();
        self.question_cache
            .get_or_try_insert_with(&key, || self.answer(request))
            .await
    }

    /// Draft SQL for a question without running it.
    pub async fn plan(&self, question: &str, top_k: usize) -> Result<PlanResult> {
        self.planner.build_plan(question, top_k).await
    }

    /// Every table in the current snapshot with its key hints, plus the alias
    /// table.
    pub async fn describe_schema(&self) -> Result<SchemaResponse> {
        let tables = self.catalog.get_tables().await?;
        let tables = tables
            .iter()
            .map(|table| {
                let hints = derive_pk_fk(table);
                SchemaTable {
                    full_name: table.full_name(),
                    columns: table.columns.clone(),
                    pk: hints.pk,
                    fk: hints
                        .fk
                        .into_iter()
                        .map(|hint| ForeignKey {
                            col: hint.column,
                            reference: hint.references,
                        })
                        .collect(),
                    comment: table.comment.clone(),
                }
            })
            .collect();

        Ok(SchemaResponse {
            tables,
            synonyms: default_synonyms()
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        })
    }

    /// Drop the cached schema snapshot and every cached answer.
    pub fn invalidate_caches(&self) {
        self.catalog.invalidate();
        self.question_cache.clear();
    }

    async fn answer(&self, request: &AskRequest) -> Result<AskResponse> {
        let plan = self.planner.build_plan(&request.question, request.top_k).await?;
        let outcome = self.repair.run(&request.question, &plan).await?;

        let chart = select_chart(&outcome.rows, request.chart_preference).map(ChartPayload::from);
        let answer_text = format_answer_summary(&request.question, &outcome.rows);

        let event = AskEvent::new(
            &request.question,
            plan.tables_considered,
            &outcome.sql,
            outcome.rows.len(),
            outcome.attempts,
        );
        log_ask_event(&event);

        Ok(AskResponse {
            answer_text,
            sql: outcome.sql,
            fields_used: outcome.fields_used,
            sampled_rows: outcome.rows,
            chart,
        })
    }
}

fn log_ask_event(event: &AskEvent) {
    info!(
        target: "nl2sql::audit",
        id = %event.id,
        timestamp = %event.timestamp.to_rfc3339(),
        question = %event.question,
        tables_considered = %event.tables_considered.join(","),
        final_sql = %event.final_sql,
        row_count = event.row_count,
        attempts = event.attempts,
        "ask_event"
    );
}

/// One-line summary naming the row count and the result fields.
pub fn format_answer_summary(question: &str, rows: &[Row]) -> String {
    match rows.first() {
        None => "No rows were returned. Consider adjusting your filters.".to_string(),
        Some(sample) => format!(
            "The query answered '{}' and returned {} row(s) with fields: {}.",
            question,
            rows.len(),
            sample.keys().join(", ")
        ),
    }
}
