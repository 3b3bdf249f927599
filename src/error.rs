use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    #[cfg(feature = "openai")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown supplier: {0}")]
    UnknownSupplier(String),

    #[error("Unknown matching method: {0}")]
    UnknownMethod(String),

    #[error("{engine} engine unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("No reference transactions with suppliers")]
    EmptyReference,

    #[error("Invalid import file: {0}")]
    InvalidImport(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    pub fn unavailable(engine: &str, reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
