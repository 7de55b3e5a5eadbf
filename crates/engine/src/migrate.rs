//! Archive schema migrations.
//!
//! Each step rewrites one serialized record from `from` to `from + 1`. Steps
//! are pure and either produce a record or fail for that record.

use serde_json::{Map, Value};

use lorekeep_core::Table;

use crate::error::EngineError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub struct Migration {
    pub from: u32,
    pub description: &'static str,
    pub apply: fn(Table, Value) -> Result<Value, String>,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    description: "add synced_version, decode JSON-encoded creature tags and item properties",
    apply: v1_to_v2,
}];

/// Bring one raw record from `from_version` up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate_record(from_version: u32, table: Table, mut record: Value) -> Result<Value, EngineError> {
    for version in from_version..CURRENT_SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|m| m.from == version)
            .ok_or_else(|| EngineError::CorruptArchive(format!("no migration from schema version {version}")))?;
        let key = record_key(&record);
        record = (step.apply)(table, record).map_err(|reason| EngineError::UnmigratableRecord {
            table,
            key,
            reason,
        })?;
    }
    Ok(record)
}

fn record_key(record: &Value) -> String {
    record
        .get("key")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

fn decode_embedded(fields: &mut Map<String, Value>, name: &str, want_list: bool) -> Result<(), String> {
    let Some(Value::String(encoded)) = fields.get(name) else {
        return Ok(());
    };
    let decoded = if encoded.trim().is_empty() {
        if want_list {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    } else {
        serde_json::from_str::<Value>(encoded).map_err(|e| format!("{name} is not valid JSON: {e}"))?
    };
    let shape_ok = if want_list {
        decoded.is_array()
    } else {
        decoded.is_object()
    };
    if !shape_ok {
        let expected = if want_list { "a list" } else { "a mapping" };
        return Err(format!("{name} does not encode {expected}"));
    }
    fields.insert(name.to_string(), decoded);
    Ok(())
}

fn v1_to_v2(table: Table, mut record: Value) -> Result<Value, String> {
    let obj = record
        .as_object_mut()
        .ok_or_else(|| "record is not an object".to_string())?;
    obj.entry("synced_version").or_insert(Value::Null);

    if let Some(fields) = obj.get_mut("fields").and_then(Value::as_object_mut) {
        match table {
            Table::Creature => decode_embedded(fields, "tags", true)?,
            Table::Item => decode_embedded(fields, "properties", false)?,
            _ => {}
        }
    }
    Ok(record)
}
