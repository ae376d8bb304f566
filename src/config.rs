//! Settings
//!
//! Environment-driven configuration. The binary calls `dotenv::dotenv()` first,
//! so a local `.env` file works the same as exported variables.

use crate::error::{Nl2SqlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_ROWS: usize = 500;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_QUESTION_CACHE_TTL_SECS: u64 = 120;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SQL_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 8;

/// Which chat-completion API the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    OpenAi,
    Anthropic,
}

impl FromStr for LlmProviderKind {
    type Err = Nl2SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            other => Err(Nl2SqlError::Config(format!(
                "Unsupported LLM provider: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProviderKind::OpenAi => write!(f, "openai"),
            LlmProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: LlmProviderKind,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_base_url: String,

    pub databricks_host: String,
    pub databricks_http_path: String,
    pub databricks_token: String,

    /// Empty means every catalog.
    pub default_catalogs: Vec<String>,
    /// Empty means every schema.
    pub default_schemas: Vec<String>,

    pub max_rows: usize,
    pub cache_ttl: Duration,
    pub question_cache_ttl: Duration,
    pub llm_timeout: Duration,
    pub sql_timeout: Duration,
    pub max_concurrent_calls: usize,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| Nl2SqlError::Config(format!("{} is not configured", key)))
        };

        let llm_provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => LlmProviderKind::OpenAi,
        };

        Ok(Self {
            llm_provider,
            llm_model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| crate::llm::openai::DEFAULT_BASE_URL.to_string()),
            anthropic_base_url: get("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| crate::llm::anthropic::DEFAULT_BASE_URL.to_string()),
            databricks_host: require("DATABRICKS_HOST")?,
            databricks_http_path: require("DATABRICKS_HTTP_PATH")?,
            databricks_token: require("DATABRICKS_PERSONAL_ACCESS_TOKEN")?,
            default_catalogs: get("DEFAULT_CATALOGS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            default_schemas: get("DEFAULT_SCHEMAS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            max_rows: parse_number(get("MAX_ROWS"), "MAX_ROWS", DEFAULT_MAX_ROWS)?,
            cache_ttl: Duration::from_secs(parse_number(
                get("CACHE_TTL_SECONDS"),
                "CACHE_TTL_SECONDS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
            question_cache_ttl: Duration::from_secs(parse_number(
                get("QUESTION_CACHE_TTL_SECONDS"),
                "QUESTION_CACHE_TTL_SECONDS",
                DEFAULT_QUESTION_CACHE_TTL_SECS,
            )?),
            llm_timeout: Duration::from_secs(parse_number(
                get("LLM_TIMEOUT"),
                "LLM_TIMEOUT",
                DEFAULT_LLM_TIMEOUT_SECS,
            )?),
            sql_timeout: Duration::from_secs(parse_number(
                get("SQL_TIMEOUT"),
                "SQL_TIMEOUT",
                DEFAULT_SQL_TIMEOUT_SECS,
            )?),
            max_concurrent_calls: parse_number(
                get("MAX_CONCURRENT_CALLS"),
                "MAX_CONCURRENT_CALLS",
                DEFAULT_MAX_CONCURRENT_CALLS,
            )?
            .max(1),
        })
    }

    /// Warehouse id taken from the last segment of the HTTP path,
    /// e.g. `/sql/1.0/warehouses/abc123` -> `abc123`.
    pub fn warehouse_id(&self) -> Result<String> {
        let path = self.databricks_http_path.trim().trim_end_matches('/');
        match path.rsplit_once("/warehouses/") {
            Some((_, id)) if !id.is_empty() && !id.contains('/') => Ok(id.to_string()),
            _ => Err(Nl2SqlError::Config(format!(
                "DATABRICKS_HTTP_PATH does not name a SQL warehouse: {}",
                self.databricks_http_path
            ))),
        }
    }
}

/// Split a comma-separated setting, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| {
            Nl2SqlError::Config(format!("{} must be a non-negative integer, got '{}'", key, value))
        }),
        None => Ok(default),
    }
}
