use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown origin: {0}")]
    UnknownOrigin(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
