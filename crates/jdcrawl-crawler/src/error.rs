use std::path::PathBuf;

use jdcrawl_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("record file {path} holds invalid UTF-8: {source}")]
    InvalidUtf8 {
        path: PathBuf,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("corrupt record at {path}:{line}: {source}")]
    CorruptLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum IdStoreError {
    #[error("id file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("id file {path} holds invalid UTF-8: {source}")]
    InvalidUtf8 {
        path: PathBuf,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("keyword \"{0}\" has no file-safe characters")]
    InvalidKeyword(String),

    #[error("invalid product id at {path}:{line}: {reason}")]
    InvalidLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Errors that abort a whole crawl run. Per-pair crawl failures are recorded
/// on the pair's job instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Db(DbError),

    /// A cursor was advanced out of order: two writers touched one pair.
    #[error("checkpoint invariant violated for {pair}: cursor at {current}, attempted to complete page {attempted}")]
    StaleAdvance {
        pair: String,
        current: u32,
        attempted: u32,
    },
}

impl From<DbError> for OrchestratorError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StaleAdvance {
                pair,
                current,
                attempted,
            } => OrchestratorError::StaleAdvance {
                pair,
                current,
                attempted,
            },
            other => OrchestratorError::Db(other),
        }
    }
}
