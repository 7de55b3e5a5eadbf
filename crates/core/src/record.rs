use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::field_value::{fields_to_json, Fields};
use crate::ids::{Origin, RecordKey, Table};

/// Largest version a record may carry; stores keep versions as signed
/// 64-bit integers.
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// The unit of storage and exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRecord {
    pub table: Table,
    pub key: RecordKey,
    pub version: u64,
    pub fields: Fields,
    pub origin: Origin,
    pub updated_at: DateTime<Utc>,
    /// Version at the last reference/generated write, `None` if never synced.
    pub synced_version: Option<u64>,
}

impl LogicalRecord {
    /// True when no user edit has landed since the last reference sync.
    pub fn is_unmodified_since_sync(&self) -> bool {
        self.synced_version == Some(self.version)
    }

    pub fn to_archived(&self) -> ArchivedRecord {
        ArchivedRecord {
            table: self.table,
            key: self.key.as_str().to_string(),
            version: self.version,
            origin: self.origin,
            updated_at: self.updated_at,
            synced_version: self.synced_version,
            fields: fields_to_json(&self.fields),
        }
    }
}

/// Serialized form of a record inside an archive table file.
///
/// Everything here is untrusted until it has been through the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub table: Table,
    pub key: String,
    pub version: u64,
    pub origin: Origin,
    pub updated_at: DateTime<Utc>,
    pub synced_version: Option<u64>,
    pub fields: Value,
}

/// A record that has passed schema validation.
///
/// Only the validator can construct one, so anything downstream that takes a
/// `ValidatedRecord` never sees an unvalidated shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord(LogicalRecord);

impl ValidatedRecord {
    pub(crate) fn new(record: LogicalRecord) -> Self {
        Self(record)
    }

    pub fn record(&self) -> &LogicalRecord {
        &self.0
    }

    pub fn into_record(self) -> LogicalRecord {
        self.0
    }
}

impl Deref for ValidatedRecord {
    type Target = LogicalRecord;

    fn deref(&self) -> &LogicalRecord {
        &self.0
    }
}

/// blake3 digest over the msgpack encoding of a field map.
pub fn fields_digest(fields: &Fields) -> Result<[u8; 32], CoreError> {
    let bytes = rmp_serde::to_vec(fields).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(*blake3::hash(&bytes).as_bytes())
}
