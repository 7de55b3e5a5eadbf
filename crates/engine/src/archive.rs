//! Tar bundle codec.
//!
//! A bundle holds `manifest.json` plus one `{table}.json` file per table.
//! Each table file is a JSON array of records ordered by key, and the
//! manifest carries its record count and blake3 checksum. Decoding checks
//! every file against the manifest before any record leaves this module.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use lorekeep_core::{ArchivedRecord, LogicalRecord, Table};

use crate::error::EngineError;
use crate::migrate::{migrate_record, CURRENT_SCHEMA_VERSION};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub file: String,
    pub count: usize,
    /// blake3 hex digest of the table file bytes.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    /// Keyed by table name.
    pub tables: BTreeMap<String, TableEntry>,
}

impl Manifest {
    pub fn entry(&self, table: Table) -> Option<&TableEntry> {
        self.tables.get(table.as_str())
    }
}

/// A decoded bundle. Records are migrated to the current schema version but
/// not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub manifest: Manifest,
    pub tables: BTreeMap<Table, Vec<ArchivedRecord>>,
}

impl Bundle {
    pub fn record_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// Output of an export.
#[derive(Debug, Clone)]
pub struct ExportedArchive {
    /// `{prefix}_{YYYYmmdd_HHMMSS}.tar`
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub manifest: Manifest,
}

impl ExportedArchive {
    /// Write the archive into `dir` under its file name.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

pub fn archive_file_name(prefix: &str, created_at: DateTime<Utc>) -> String {
    format!("{prefix}_{}.tar", created_at.format("%Y%m%d_%H%M%S"))
}

fn table_file(table: Table) -> String {
    format!("{}.json", table.as_str())
}

fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn corrupt(detail: impl Into<String>) -> EngineError {
    EngineError::CorruptArchive(detail.into())
}

fn append(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
    mtime: u64,
) -> Result<(), EngineError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Encode a store snapshot. Identical snapshots give identical table files.
pub fn encode(
    snapshot: &BTreeMap<Table, Vec<LogicalRecord>>,
    created_at: DateTime<Utc>,
    pretty: bool,
) -> Result<(Manifest, Vec<u8>), EngineError> {
    let mut files = Vec::with_capacity(snapshot.len());
    let mut tables = BTreeMap::new();

    for (table, records) in snapshot {
        let mut archived: Vec<ArchivedRecord> = records.iter().map(LogicalRecord::to_archived).collect();
        archived.sort_by(|a, b| a.key.cmp(&b.key));

        let bytes = if pretty {
            serde_json::to_vec_pretty(&archived)
        } else {
            serde_json::to_vec(&archived)
        }
        .map_err(|e| EngineError::Core(lorekeep_core::CoreError::Serialization(e.to_string())))?;

        let file = table_file(*table);
        tables.insert(
            table.as_str().to_string(),
            TableEntry {
                file: file.clone(),
                count: archived.len(),
                checksum: checksum(&bytes),
            },
        );
        files.push((file, bytes));
    }

    let manifest = Manifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        created_at,
        tables,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| EngineError::Core(lorekeep_core::CoreError::Serialization(e.to_string())))?;

    let mtime = u64::try_from(created_at.timestamp()).unwrap_or(0);
    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, MANIFEST_FILE, &manifest_bytes, mtime)?;
    for (file, bytes) in &files {
        append(&mut builder, file, bytes, mtime)?;
    }
    let bytes = builder.into_inner()?;

    debug!(tables = files.len(), bytes = bytes.len(), "encoded bundle");
    Ok((manifest, bytes))
}

fn unpack(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, EngineError> {
    let mut archive = tar::Archive::new(bytes);
    let mut files = BTreeMap::new();
    let entries = archive
        .entries()
        .map_err(|e| corrupt(format!("unreadable tar stream: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(format!("unreadable tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            return Err(corrupt("archive contains a non-file entry"));
        }
        let path = entry
            .path()
            .map_err(|e| corrupt(format!("bad entry path: {e}")))?
            .to_string_lossy()
            .into_owned();
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| corrupt(format!("truncated entry {path}: {e}")))?;
        if files.insert(path.clone(), data).is_some() {
            return Err(corrupt(format!("duplicate entry {path}")));
        }
    }
    Ok(files)
}

/// Decode and verify a bundle, migrating older schema versions.
///
/// Any checksum, count or structure mismatch invalidates the whole bundle.
pub fn decode(bytes: &[u8], max_bytes: u64) -> Result<Bundle, EngineError> {
    if bytes.len() as u64 > max_bytes {
        return Err(corrupt(format!(
            "archive is {} bytes, limit is {max_bytes}",
            bytes.len()
        )));
    }

    let mut files = unpack(bytes)?;
    let manifest_bytes = files
        .remove(MANIFEST_FILE)
        .ok_or_else(|| corrupt("missing manifest.json"))?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| corrupt(format!("unreadable manifest: {e}")))?;

    if manifest.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(EngineError::UnsupportedSchemaVersion {
            found: manifest.schema_version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if manifest.schema_version == 0 {
        return Err(corrupt("schema version 0"));
    }

    let mut tables = BTreeMap::new();
    for (name, entry) in &manifest.tables {
        let table = Table::parse(name).map_err(|_| corrupt(format!("unknown table {name}")))?;
        if entry.file != table_file(table) {
            return Err(corrupt(format!("table {name} points at {}", entry.file)));
        }
        let data = files
            .remove(&entry.file)
            .ok_or_else(|| corrupt(format!("missing {}", entry.file)))?;
        if checksum(&data) != entry.checksum {
            return Err(corrupt(format!("checksum mismatch for {}", entry.file)));
        }
        let raw: Vec<Value> = serde_json::from_slice(&data)
            .map_err(|e| corrupt(format!("unreadable {}: {e}", entry.file)))?;
        if raw.len() != entry.count {
            return Err(corrupt(format!(
                "{} holds {} records, manifest says {}",
                entry.file,
                raw.len(),
                entry.count
            )));
        }

        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            let value = migrate_record(manifest.schema_version, table, value)?;
            let record: ArchivedRecord = serde_json::from_value(value)
                .map_err(|e| corrupt(format!("malformed record in {}: {e}", entry.file)))?;
            // Encoding sorts by key, so keys must be strictly ascending.
            if let Some(prev) = records.last().map(|r: &ArchivedRecord| r.key.as_str()) {
                if record.key.as_str() == prev {
                    return Err(corrupt(format!("duplicate key {prev} in {}", entry.file)));
                }
                if record.key.as_str() < prev {
                    return Err(corrupt(format!(
                        "key {} follows {prev} in {}",
                        record.key, entry.file
                    )));
                }
            }
            records.push(record);
        }
        tables.insert(table, records);
    }

    if let Some(extra) = files.keys().next() {
        return Err(corrupt(format!("unexpected file {extra}")));
    }

    debug!(
        schema_version = manifest.schema_version,
        tables = tables.len(),
        "decoded bundle"
    );
    Ok(Bundle { manifest, tables })
}
