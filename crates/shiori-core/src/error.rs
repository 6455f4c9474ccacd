use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShioriError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The storage backend cannot be used at all (disabled, sandboxed, unopenable).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored blob exists but cannot be decoded.
    #[error("stored reading history is corrupt: {0}")]
    StorageReadCorrupt(String),

    /// A write was rejected, e.g. quota exceeded.
    #[error("failed to write reading history: {0}")]
    StorageWriteFailed(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid progress: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
