use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
