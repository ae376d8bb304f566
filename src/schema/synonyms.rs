//! Business-term aliases and verbatim column mentions.

use crate::schema::catalog::Table;
use lazy_static::lazy_static;
use std::collections::BTreeMap;

lazy_static! {
    static ref DEFAULT_SYNONYMS: BTreeMap<&'static str, &'static str> = BTreeMap::from([
        ("arr", "finance.revenue.annual_recurring_revenue"),
        ("revpor", "finance.revenue.revenue_per_room"),
    ]);
}

/// Process-wide alias table: alias -> dotted schema path.
pub fn default_synonyms() -> &'static BTreeMap<&'static str, &'static str> {
    &DEFAULT_SYNONYMS
}

/// Every known alias that appears (case-insensitively) in the question.
pub fn resolve_synonyms(question: &str) -> BTreeMap<String, String> {
    resolve_synonyms_in(question, default_synonyms())
}

pub fn resolve_synonyms_in(
    question: &str,
    synonyms: &BTreeMap<&str, &str>,
) -> BTreeMap<String, String> {
    let question_lower = question.to_lowercase();
    synonyms
        .iter()
        .filter(|(alias, _)| question_lower.contains(&alias.to_lowercase()))
        .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
        .collect()
}

/// `(full_name, column)` for every column of any table whose name appears
/// verbatim in the question.
pub fn surface_relevant_columns(question: &str, tables: &[Table]) -> Vec<(String, String)> {
    let question_lower = question.to_lowercase();
    tables
        .iter()
        .flat_map(|table| {
            let question_lower = &question_lower;
            table
                .columns
                .iter()
                .filter(move |c| question_lower.contains(&c.name.to_lowercase()))
                .map(move |c| (table.full_name(), c.name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::Column;

    #[test]
    fn test_resolve_is_case_insensitive_and_returns_all_matches() {
        let matched = resolve_synonyms("Compare ARR with RevPOR by region");
        assert_eq!(matched.len(), 2);
        assert_eq!(matched["arr"], "finance.revenue.annual_recurring_revenue");
        assert_eq!(matched["revpor"], "finance.revenue.revenue_per_room");
    }

    #[test]
    fn test_resolve_no_match() {
        assert!(resolve_synonyms("orders per day").is_empty());
    }

    #[test]
    fn test_resolve_custom_table() {
        let table = BTreeMap::from([("gmv", "sales.orders.gross_value")]);
        let matched = resolve_synonyms_in("GMV last week", &table);
        assert_eq!(matched.get("gmv").map(String::as_str), Some("sales.orders.gross_value"));
    }

    #[test]
    fn test_surface_relevant_columns() {
        let tables = vec![Table {
            catalog: "main".into(),
            schema: "sales".into(),
            name: "orders".into(),
            columns: vec![
                Column { name: "region".into(), data_type: "STRING".into(), comment: None },
                Column { name: "amount".into(), data_type: "DOUBLE".into(), comment: None },
            ],
            comment: None,
        }];
        let hits = surface_relevant_columns("Total amount by Region", &tables);
        assert_eq!(
            hits,
            vec![
                ("main.sales.orders".to_string(), "region".to_string()),
                ("main.sales.orders".to_string(), "amount".to_string()),
            ]
        );
    }
}
