use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("no index snapshot is loaded")]
    Unavailable,

    #[error("embedding has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding for chunk '{0}' contains non-finite values")]
    NonFinite(String),

    #[error("snapshot version {offered} is not newer than the live version {live}")]
    StaleSnapshot { offered: u64, live: u64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LanceDB error: {0}")]
    Lance(#[from] lancedb::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Corrupt snapshot '{version}': {reason}")]
    Corrupt { version: String, reason: String },

    #[error("Snapshot v{version} does not match configuration: {reason}")]
    Incompatible { version: u64, reason: String },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
