use thiserror::Error;
use wellsync_core::RemoteTable;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed value under {key}: {reason}")]
    Malformed { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure, timeout or server-side error. Retried on the next load cycle.
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote requires an authenticated user")]
    AuthRequired,

    /// Constraint violation on the rows of one upsert.
    #[error("upsert conflict on {table}: {reason}")]
    Conflict { table: RemoteTable, reason: String },

    #[error("undecodable remote row in {table}: {reason}")]
    Decode { table: RemoteTable, reason: String },
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
