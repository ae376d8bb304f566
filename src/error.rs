use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model output that is not JSON, or JSON that is not a usable plan.
    #[error("Model format error: {0}")]
    ModelFormat(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("SQL failed after {attempts} attempts: {last_error}")]
    RepairExhausted { attempts: usize, last_error: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Nl2SqlError {
    /// Failures the repair loop turns into another attempt instead of surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Nl2SqlError::PolicyViolation(_) | Nl2SqlError::Warehouse(_))
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;
