//! Dry-Run Validator
//!
//! Asks the warehouse for a query plan instead of rows, so unknown tables,
//! unknown columns and syntax errors surface before anything is executed.

use crate::error::{Nl2SqlError, Result};
use crate::warehouse::Warehouse;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Databricks reports analysis failures inside the plan text of a successful
/// EXPLAIN rather than failing the statement.
const PLANNING_ERROR_MARKER: &str = "Error occurred during query planning";

pub struct DryRunValidator {
    warehouse: Arc<dyn Warehouse>,
}

impl DryRunValidator {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Plan `sql` without materializing rows. Any warehouse-reported problem is
    /// `Nl2SqlError::Warehouse` carrying the warehouse's message.
    pub async fn dry_run(&self, sql: &str) -> Result<()> {
        let output = self.warehouse.query(&explain_statement(sql), None).await?;

        let plan = output
            .rows
            .iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        if plan.contains(PLANNING_ERROR_MARKER) {
            return Err(Nl2SqlError::Warehouse(plan.trim().to_string()));
        }

        debug!("Dry run passed ({} plan chars)", plan.len());
        Ok(())
    }
}

pub fn explain_statement(sql: &str) -> String {
    format!("EXPLAIN \n{}", sql)
}
