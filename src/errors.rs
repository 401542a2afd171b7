// errors.rs
use crate::apimo::TransportError;
use thiserror::Error;

/// Failures of the local store adapter. Every adapter call can produce one.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("media download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Errors that stop a whole pass (or maintenance run).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("a {job} pass is already in progress (run {run_id})")]
    PassInProgress { job: String, run_id: i64 },

    #[error("refusing to prune: {0}")]
    UnsafePrune(String),
}
