//! Warehouse
//!
//! The single query interface every catalog load, dry-run and execution goes
//! through. Implementations own their connection handling; callers only see
//! column names and rows of JSON scalars.

pub mod databricks;

use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub use databricks::DatabricksWarehouse;

/// Raw statement output: column names from the result metadata plus rows in
/// warehouse order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Run a statement and return at most `row_limit` rows (all rows when `None`).
    /// Errors reported by the warehouse come back as `Nl2SqlError::Warehouse`.
    async fn query(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryOutput>;
}

/// Caps how many statements run against the inner warehouse at once.
pub struct BoundedWarehouse {
    inner: Arc<dyn Warehouse>,
    permits: Arc<Semaphore>,
}

impl BoundedWarehouse {
    pub fn new(inner: Arc<dyn Warehouse>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl Warehouse for BoundedWarehouse {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn query(&self, sql: &str, row_limit: Option<usize>) -> Result<QueryOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Nl2SqlError::Warehouse("Warehouse limiter closed".to_string()))?;
        self.inner.query(sql, row_limit).await
    }
}
