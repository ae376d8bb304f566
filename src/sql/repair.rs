//! Repair Loop
//!
//! Validate -> dry-run -> execute, and on a recoverable failure ask the model
//! for revised SQL using the failure message, up to `max_retries` times.
//! Every attempt yields an explicit `AttemptOutcome`; errors that are not
//! recoverable (LLM transport, model format, configuration) end the loop
//! immediately.

use crate::error::{Nl2SqlError, Result};
use crate::llm::prompts::repair_prompt;
use crate::llm::LlmGateway;
use crate::planner::{coerce_fields, PlanResult};
use crate::sql::executor::{Executor, Row};
use crate::sql::guard::ensure_select_only;
use crate::sql::validator::DryRunValidator;
use crate::warehouse::Warehouse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const JSON_REMINDER: &str = "Return JSON only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    DryRun,
    Executing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::DryRun => "dry-run",
            Stage::Executing => "executing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub stage: Stage,
    /// The underlying message, passed verbatim into the repair prompt.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded(Vec<Row>),
    Failed(AttemptFailure),
}

/// Terminal success: the SQL that ran, its claimed fields and the rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub sql: String,
    pub fields_used: Vec<String>,
    pub rows: Vec<Row>,
    /// 1-based count of validate/dry-run/execute attempts made.
    pub attempts: usize,
}

pub struct RepairLoop {
    llm: Arc<LlmGateway>,
    validator: DryRunValidator,
    executor: Executor,
    max_rows: usize,
    max_retries: usize,
}

impl RepairLoop {
    pub fn new(llm: Arc<LlmGateway>, warehouse: Arc<dyn Warehouse>, max_rows: usize) -> Self {
        Self {
            llm,
            validator: DryRunValidator::new(warehouse.clone()),
            executor: Executor::new(warehouse, max_rows),
            max_rows,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Run the plan's SQL, regenerating it after each recoverable failure.
    /// Makes at most `max_retries + 1` attempts; when all fail the result is
    /// `RepairExhausted` carrying the last failure message.
    pub async fn run(&self, question: &str, plan: &PlanResult) -> Result<RepairOutcome> {
        let total = self.max_retries + 1;
        let mut sql = plan.sql.clone();
        let mut fields_used = plan.fields_used.clone();
        let mut attempt = 1;

        loop {
            info!("SQL attempt {} of {}", attempt, total);
            let failure = match self.attempt(&sql).await? {
                AttemptOutcome::Succeeded(rows) => {
                    info!("SQL attempt {} succeeded with {} row(s)", attempt, rows.len());
                    return Ok(RepairOutcome {
                        sql,
                        fields_used,
                        rows,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Failed(failure) => failure,
            };

            warn!(
                "SQL attempt {} failed while {}: {}",
                attempt, failure.stage, failure.message
            );
            if attempt >= total {
                return Err(Nl2SqlError::RepairExhausted {
                    attempts: attempt,
                    last_error: failure.message,
                });
            }

            let prompt = repair_prompt(
                question,
                &plan.schema_context,
                &failure.message,
                &sql,
                self.max_rows,
            );
            let reply = self.llm.complete_json(&prompt, JSON_REMINDER).await?;

            match reply.get("sql").and_then(Value::as_str) {
                Some(revised) => sql = revised.trim().to_string(),
                None => warn!("Repair reply had no sql; retrying the previous statement"),
            }
            if let Some(fields) = coerce_fields(reply.get("fields_used")) {
                fields_used = fields;
            }
            attempt += 1;
        }
    }

    /// One pass through the gate, the dry run and the execution.
    pub async fn attempt(&self, sql: &str) -> Result<AttemptOutcome> {
        match self.run_stages(sql).await {
            Ok(rows) => Ok(AttemptOutcome::Succeeded(rows)),
            Err((stage, err)) if err.is_recoverable() => {
                Ok(AttemptOutcome::Failed(AttemptFailure {
                    stage,
                    message: failure_message(err),
                }))
            }
            Err((_, err)) => Err(err),
        }
    }

    async fn run_stages(&self, sql: &str) -> std::result::Result<Vec<Row>, (Stage, Nl2SqlError)> {
        ensure_select_only(sql).map_err(|e| (Stage::Validating, e))?;
        self.validator
            .dry_run(sql)
            .await
            .map_err(|e| (Stage::DryRun, e))?;
        self.executor
            .execute(sql)
            .await
            .map_err(|e| (Stage::Executing, e))
    }
}

fn failure_message(err: Nl2SqlError) -> String {
    match err {
        Nl2SqlError::PolicyViolation(message) | Nl2SqlError::Warehouse(message) => message,
        other => other.to_string(),
    }
}
