use thiserror::Error;
use wellsync_core::CoreError;
use wellsync_storage::{RemoteError, StorageError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("habit not found: {0}")]
    HabitNotFound(String),

    #[error("sync engine must be created inside a tokio runtime")]
    NoRuntime,
}
