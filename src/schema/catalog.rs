//! Catalog Reader
//!
//! Loads table and column metadata from the warehouse information schema and
//! keeps it as an immutable snapshot behind a TTL cache. A reader that finds a
//! fresh snapshot never triggers a reload; a stale one is replaced whole.

use crate::cache::TtlCache;
use crate::error::{Nl2SqlError, Result};
use crate::warehouse::{QueryOutput, Warehouse};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SNAPSHOT_KEY: &str = "metadata";

lazy_static! {
    static ref FK_COLUMN: Regex = Regex::new(r"^(.+)_id$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Warehouse-native type name, e.g. `BIGINT`, `DECIMAL(18,2)`.
    #[serde(rename = "type")]
    pub data_type: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub comment: Option<String>,
}

impl Table {
    /// `catalog.schema.table`, the identity key for a table within one load.
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.name)
    }
}

/// Turn an identifier into a readable phrase: `order_items` -> `order items`.
pub fn humanize(identifier: &str) -> String {
    identifier.replace('_', " ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyHint {
    pub column: String,
    /// `catalog.schema.table(id)`
    pub references: String,
}

impl fmt::Display for ForeignKeyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.column, self.references)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHints {
    pub pk: Vec<String>,
    pub fk: Vec<ForeignKeyHint>,
}

/// Name-based key guesses. `id` and `*_id` columns are primary-key candidates;
/// `<prefix>_id` is read as a reference to `<catalog>.<schema>.<prefix>(id)`.
/// No constraints are introspected, so irregular naming gives wrong answers.
pub fn derive_pk_fk(table: &Table) -> KeyHints {
    let pk = table
        .columns
        .iter()
        .filter(|c| c.name == "id" || c.name.ends_with("_id"))
        .map(|c| c.name.clone())
        .collect();

    let fk = table
        .columns
        .iter()
        .filter_map(|c| {
            FK_COLUMN.captures(&c.name).map(|caps| ForeignKeyHint {
                column: c.name.clone(),
                references: format!("{}.{}.{}(id)", table.catalog, table.schema, &caps[1]),
            })
        })
        .collect();

    KeyHints { pk, fk }
}

pub struct CatalogReader {
    warehouse: Arc<dyn Warehouse>,
    catalogs: Vec<String>,
    schemas: Vec<String>,
    cache: TtlCache<Arc<Vec<Table>>>,
}

impl CatalogReader {
    /// # Arguments
    /// * `catalogs` / `schemas` - allow-lists; empty means no filter
    /// * `ttl` - how long a loaded snapshot is served before reloading
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        catalogs: Vec<String>,
        schemas: Vec<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            warehouse,
            catalogs,
            schemas,
            cache: TtlCache::new(ttl),
        }
    }

    /// Current schema snapshot, loading it on a cache miss. Load errors
    /// propagate as-is; there is no retry at this layer.
    pub async fn get_tables(&self) -> Result<Arc<Vec<Table>>> {
        self.cache
            .get_or_try_insert_with(SNAPSHOT_KEY, || async {
                self.load_metadata().await.map(Arc::new)
            })
            .await
    }

    /// Drop the cached snapshot so the next read reloads.
    pub fn invalidate(&self) {
        self.cache.remove(SNAPSHOT_KEY);
    }

    pub fn metadata_query(&self) -> String {
        let mut conditions = vec!["c.table_schema NOT IN ('information_schema')".to_string()];
        if !self.catalogs.is_empty() {
            conditions.push(format!("c.table_catalog IN ({})", quote_list(&self.catalogs)));
        }
        if !self.schemas.is_empty() {
            conditions.push(format!("c.table_schema IN ({})", quote_list(&self.schemas)));
        }

        format!(
            r#"SELECT
    c.table_catalog,
    c.table_schema,
    c.table_name,
    c.column_name,
    c.data_type,
    c.comment AS column_comment,
    t.comment AS table_comment
FROM system.information_schema.columns c
LEFT JOIN system.information_schema.tables t
    ON c.table_catalog = t.table_catalog
    AND c.table_schema = t.table_schema
    AND c.table_name = t.table_name
WHERE {}
ORDER BY c.table_catalog, c.table_schema, c.table_name, c.ordinal_position"#,
            conditions.join("\n    AND ")
        )
    }

    async fn load_metadata(&self) -> Result<Vec<Table>> {
        let output = self.warehouse.query(&self.metadata_query(), None).await?;
        let tables = group_metadata_rows(&output)?;
        info!(
            "Loaded {} tables ({} columns) from {} information schema",
            tables.len(),
            tables.iter().map(|t| t.columns.len()).sum::<usize>(),
            self.warehouse.name()
        );
        Ok(tables)
    }
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("'{}'", item.replace('\'', "''")))
        .join(",")
}

/// Group flat `(catalog, schema, table, column, type, column_comment,
/// table_comment)` rows into tables, keeping first-seen order.
pub fn group_metadata_rows(output: &QueryOutput) -> Result<Vec<Table>> {
    let mut tables: Vec<Table> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (row_idx, row) in output.rows.iter().enumerate() {
        let field = |idx: usize, name: &str| {
            text_cell(row, idx).ok_or_else(|| {
                Nl2SqlError::Warehouse(format!(
                    "Metadata row {} is missing {}",
                    row_idx, name
                ))
            })
        };
        let catalog = field(0, "table_catalog")?;
        let schema = field(1, "table_schema")?;
        let name = field(2, "table_name")?;
        let column = Column {
            name: field(3, "column_name")?,
            data_type: text_cell(row, 4).unwrap_or_default(),
            comment: text_cell(row, 5),
        };

        let key = format!("{}.{}.{}", catalog, schema, name);
        let position = match index.get(&key) {
            Some(position) => *position,
            None => {
                let comment = text_cell(row, 6).unwrap_or_else(|| humanize(&name));
                tables.push(Table {
                    catalog,
                    schema,
                    name,
                    columns: Vec::new(),
                    comment: Some(comment),
                });
                index.insert(key, tables.len() - 1);
                tables.len() - 1
            }
        };
        tables[position].columns.push(column);
    }

    Ok(tables)
}

/// Non-empty text from a cell; other scalars are rendered as text.
fn text_cell(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
