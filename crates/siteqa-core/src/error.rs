use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Typed failure of a capability call (embedding, scoring, generation, intent).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid model input: {0}")]
    InvalidInput(String),
}

impl ModelError {
    /// Unavailability and timeouts may succeed on another attempt; bad input never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Unavailable(_) | ModelError::Timeout(_))
    }
}

/// Failure kinds surfaced on the query interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    RetrievalFailed,
    RerankFailed,
    GenerationFailed,
    IndexUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::RetrievalFailed => "RetrievalFailed",
            ErrorKind::RerankFailed => "RerankFailed",
            ErrorKind::GenerationFailed => "GenerationFailed",
            ErrorKind::IndexUnavailable => "IndexUnavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
