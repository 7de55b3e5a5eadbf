use lorekeep_core::{CoreError, Table, ValidationError};
use lorekeep_storage::StorageError;
use thiserror::Error;

use crate::reconcile::Conflict;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Conflict(#[from] Box<Conflict>),

    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("unsupported archive schema version {found} (newest supported is {supported})")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("cannot migrate {table} record {key}: {reason}")]
    UnmigratableRecord {
        table: Table,
        key: String,
        reason: String,
    },

    #[error("{table} record {key} has reached the highest storable version")]
    VersionExhausted { table: Table, key: String },

    #[error("record not found: {table}/{key}")]
    NotFound { table: Table, key: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Conflict> for EngineError {
    fn from(conflict: Conflict) -> Self {
        EngineError::Conflict(Box::new(conflict))
    }
}
