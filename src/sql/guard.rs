//! SQL Safety Gate
//!
//! Lexical screening of model-written SQL. The statement must open with
//! `SELECT` or `WITH` and may not contain a mutating keyword as a whole word.
//! Keywords inside string literals or comments still match, and statement
//! separators are not inspected.

use crate::error::{Nl2SqlError, Result};
use lazy_static::lazy_static;
use regex::Regex;

pub const FORBIDDEN_KEYWORDS: [&str; 7] = [
    "UPDATE", "DELETE", "INSERT", "TRUNCATE", "CREATE", "ALTER", "DROP",
];

lazy_static! {
    static ref FORBIDDEN_PATTERNS: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"\b{}\b", kw)).unwrap()))
        .collect();
}

/// Fail with `PolicyViolation` unless `sql` is a single read-only query.
pub fn ensure_select_only(sql: &str) -> Result<()> {
    let statement = sql.trim().to_uppercase();
    if !(statement.starts_with("SELECT") || statement.starts_with("WITH")) {
        return Err(Nl2SqlError::PolicyViolation(
            "Only SELECT statements are allowed".to_string(),
        ));
    }

    if let Some((keyword, _)) = FORBIDDEN_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&statement))
    {
        return Err(Nl2SqlError::PolicyViolation(format!(
            "Forbidden keyword detected: {}",
            keyword
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(sql: &str) -> String {
        match ensure_select_only(sql) {
            Err(Nl2SqlError::PolicyViolation(msg)) => msg,
            other => panic!("expected policy violation for {:?}, got {:?}", sql, other),
        }
    }

    #[test]
    fn test_accepts_reads() {
        assert!(ensure_select_only("select 1").is_ok());
        assert!(ensure_select_only("  SELECT region, SUM(arr) FROM finance.revenue GROUP BY region").is_ok());
        assert!(ensure_select_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
        assert!(ensure_select_only("\n\twith recent AS (select 1) select * from recent").is_ok());
    }

    #[test]
    fn test_keywords_only_match_whole_words() {
        assert!(ensure_select_only("SELECT createdAt FROM t").is_ok());
        assert!(ensure_select_only("SELECT updated_at, dropoff_zone FROM trips").is_ok());
        assert!(ensure_select_only("WITH createdAt AS (SELECT 1) SELECT * FROM createdAt").is_ok());
    }

    #[test]
    fn test_rejects_non_select_statements() {
        assert_eq!(rejected("UPDATE t SET x=1"), "Only SELECT statements are allowed");
        assert_eq!(rejected("EXPLAIN SELECT 1"), "Only SELECT statements are allowed");
        assert_eq!(rejected(""), "Only SELECT statements are allowed");
    }

    #[test]
    fn test_rejects_embedded_mutations() {
        assert_eq!(
            rejected("SELECT 1; DROP TABLE users"),
            "Forbidden keyword detected: DROP"
        );
        assert_eq!(
            rejected("with x as (delete from t) select 1"),
            "Forbidden keyword detected: DELETE"
        );
        // Literals are not exempt.
        assert_eq!(
            rejected("SELECT * FROM audit WHERE action = 'insert'"),
            "Forbidden keyword detected: INSERT"
        );
    }
}
