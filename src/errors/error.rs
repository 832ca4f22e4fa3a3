use std::path::PathBuf;
use thiserror::Error;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Configuration errors raised while resolving `ExportConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is not set")]
    MissingVar(String),

    #[error("Invalid value for '{var}': {reason}")]
    InvalidValue {
        var: String,
        reason: String,
    },

    #[error("Configuration has already been initialized")]
    AlreadyInitialized,

    #[error("Configuration has not been initialized")]
    NotInitialized,
}

impl ConfigError {
    pub fn invalid_value(var: &str, reason: &str) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that abort an export run
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed passage JSON for item {id}: {source}")]
    InvalidPassage {
        id: i32,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
