//! Executor: runs the final statement and shapes rows for callers.

use crate::error::Result;
use crate::warehouse::{QueryOutput, Warehouse};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// One result record: column name -> scalar, in result column order.
pub type Row = Map<String, Value>;

pub struct Executor {
    warehouse: Arc<dyn Warehouse>,
    max_rows: usize,
}

impl Executor {
    pub fn new(warehouse: Arc<dyn Warehouse>, max_rows: usize) -> Self {
        Self {
            warehouse,
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Execute `sql`, fetching at most `max_rows` rows.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let output = self.warehouse.query(sql, Some(self.max_rows)).await?;
        let rows = shape_rows(output, self.max_rows);
        info!("Query returned {} row(s)", rows.len());
        Ok(rows)
    }
}

/// Zip column names with row values, truncating to `max_rows` regardless of
/// what the warehouse honoured. Missing trailing cells become null.
pub fn shape_rows(output: QueryOutput, max_rows: usize) -> Vec<Row> {
    let QueryOutput { columns, rows } = output;
    rows.into_iter()
        .take(max_rows)
        .map(|values| {
            let mut values = values.into_iter();
            columns
                .iter()
                .map(|column| (column.clone(), values.next().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}
