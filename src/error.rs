use thiserror::Error;

/// Every failure an invocation can resolve to.
///
/// Errors are `Clone` because a resolved stage may hand its outcome to more
/// than one continuation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Missing required component: {0}")]
    MissingComponent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Traversal already closed")]
    ViewClosed,

    #[error("Invocation abandoned before completion")]
    Abandoned,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Json(e.to_string())
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Persistence(e.to_string())
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(e: toml::de::Error) -> Self {
        CacheError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
