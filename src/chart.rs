//! Chart Selector
//!
//! Picks a chart type and axes from the shape of a result set. Field kinds are
//! read from the first row only. Rendering is left to the caller.

use crate::sql::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// More distinct categories than this get a "top categories" note on bar charts.
pub const MAX_BAR_CATEGORIES: usize = 25;
const TOP_CATEGORIES_NOTE: &str = "Showing top categories by metric";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartPreference {
    #[default]
    Auto,
    Line,
    Bar,
    Pie,
    Scatter,
    Kpi,
}

impl FromStr for ChartPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ChartPreference::Auto),
            "line" => Ok(ChartPreference::Line),
            "bar" => Ok(ChartPreference::Bar),
            "pie" => Ok(ChartPreference::Pie),
            "scatter" => Ok(ChartPreference::Scatter),
            "kpi" => Ok(ChartPreference::Kpi),
            other => Err(format!(
                "unknown chart preference '{}' (expected auto, line, bar, pie, scatter or kpi)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Scatter,
    Kpi,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Kpi => "kpi",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AxisSpec {
    fn new(x: &str, y: Option<&str>) -> Self {
        Self {
            x: x.to_string(),
            y: y.map(str::to_string),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartChoice {
    pub chart_type: ChartType,
    pub spec: AxisSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Datetime,
    Categorical,
}

/// Kind of every field in the first row, in column order. Numbers are numeric,
/// strings that parse as ISO dates or timestamps are datetime, and everything
/// else (text, booleans, nulls) is categorical.
///
/// Booleans are never numeric, so a `true`/`false` column alone does not make
/// a KPI or a bar metric. Cast it to an integer in SQL to chart it.
pub fn infer_field_kinds(rows: &[Row]) -> Vec<(String, FieldKind)> {
    let Some(sample) = rows.first() else {
        return Vec::new();
    };
    sample
        .iter()
        .map(|(name, value)| {
            let kind = match value {
                Value::Number(_) => FieldKind::Numeric,
                Value::String(s) if is_temporal(s) => FieldKind::Datetime,
                _ => FieldKind::Categorical,
            };
            (name.clone(), kind)
        })
        .collect()
}

fn is_temporal(text: &str) -> bool {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

/// Choose a chart for `rows`, or `None` when no chart fits.
///
/// With `Auto` the order is: datetime + numeric -> line, categorical + numeric
/// -> bar, two numerics plus a categorical -> scatter, any numeric -> kpi.
/// An explicit preference is honoured only when its field kinds are present;
/// otherwise there is no chart.
pub fn select_chart(rows: &[Row], preference: ChartPreference) -> Option<ChartChoice> {
    if rows.is_empty() {
        return None;
    }
    let kinds = infer_field_kinds(rows);
    let fields = |wanted: FieldKind| {
        kinds
            .iter()
            .filter(|(_, kind)| *kind == wanted)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<&str>>()
    };
    let numeric = fields(FieldKind::Numeric);
    let datetime = fields(FieldKind::Datetime);
    let categorical = fields(FieldKind::Categorical);

    let choice = |chart_type: ChartType, spec: AxisSpec| Some(ChartChoice { chart_type, spec });
    let line = || match (datetime.first(), numeric.first()) {
        (Some(x), Some(y)) => choice(ChartType::Line, AxisSpec::new(x, Some(*y))),
        _ => None,
    };
    let by_category = |chart_type: ChartType| match (categorical.first(), numeric.first()) {
        (Some(x), Some(y)) => choice(chart_type, AxisSpec::new(x, Some(*y))),
        _ => None,
    };
    let scatter = || match (numeric.as_slice(), categorical.first()) {
        ([x, y, ..], group) => choice(
            ChartType::Scatter,
            AxisSpec {
                group: group.map(|g| g.to_string()),
                ..AxisSpec::new(x, Some(*y))
            },
        ),
        _ => None,
    };
    let kpi = || numeric.first().and_then(|x| choice(ChartType::Kpi, AxisSpec::new(x, None)));

    match preference {
        ChartPreference::Line => line(),
        ChartPreference::Bar => by_category(ChartType::Bar),
        ChartPreference::Pie => by_category(ChartType::Pie),
        ChartPreference::Scatter => scatter(),
        ChartPreference::Kpi => kpi(),
        ChartPreference::Auto => line()
            .or_else(|| {
                by_category(ChartType::Bar).map(|mut bar| {
                    if distinct_values(rows, &bar.spec.x) > MAX_BAR_CATEGORIES {
                        bar.spec.note = Some(TOP_CATEGORIES_NOTE.to_string());
                    }
                    bar
                })
            })
            .or_else(|| {
                if categorical.is_empty() {
                    None
                } else {
                    scatter()
                }
            })
            .or_else(kpi),
    }
}

fn distinct_values(rows: &[Row], field: &str) -> usize {
    rows.iter()
        .map(|row| row.get(field).map(Value::to_string).unwrap_or_default())
        .unique()
        .count()
}
