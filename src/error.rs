//! Error types for the codectx library.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CtxError>;

/// Top-level error enum. RPC handlers map these onto the JSON-RPC error
/// taxonomy (`-32001` root, `-32002` policy, `-32003` read, `-32000` rest).
#[derive(Debug, thiserror::Error)]
pub enum CtxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("path outside allowed roots: {0}")]
    RootViolation(PathBuf),

    #[error("path denied by policy: {0}")]
    PolicyDenied(PathBuf),

    #[error("not indexed: {0}")]
    NotFound(String),

    #[error("{0} not found")]
    Unknown(String),

    #[error("{0}")]
    Other(String),
}

impl CtxError {
    /// JSON-RPC error code for this error.
    pub fn rpc_code(&self) -> i64 {
        match self {
            CtxError::Unknown(_) => -32601,
            CtxError::RootViolation(_) => -32001,
            CtxError::PolicyDenied(_) => -32002,
            CtxError::Io(_) | CtxError::NotFound(_) => -32003,
            _ => -32000,
        }
    }
}
