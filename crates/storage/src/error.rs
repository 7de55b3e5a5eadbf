use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("store layout version {found} is newer than supported {supported}")]
    SchemaVersion { found: i32, supported: i32 },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("core error: {0}")]
    Core(#[from] lorekeep_core::CoreError),
}
