use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use lorekeep_core::{Fields, LogicalRecord, Origin, RecordKey, Table};

use crate::error::StorageError;
use crate::traits::RecordStore;

const SELECT_COLUMNS: &str =
    "SELECT record_key, version, origin, synced_version, updated_at, fields FROM records";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        debug!(path, "opened record store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Raw column values of one `records` row, decoded outside the rusqlite
/// closure so decode failures surface as `StorageError`.
type RawRow = (String, i64, String, Option<i64>, String, Vec<u8>);

fn raw_row(row: &rusqlite::Row) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_version(n: i64, label: &str) -> Result<u64, StorageError> {
    u64::try_from(n).map_err(|_| StorageError::Serialization(format!("negative {label}: {n}")))
}

fn from_version(v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("version too large: {v}")))
}

fn decode_row(table: Table, raw: RawRow) -> Result<LogicalRecord, StorageError> {
    let (key, version, origin, synced_version, updated_at, fields) = raw;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| StorageError::Serialization(format!("bad updated_at '{updated_at}': {e}")))?
        .with_timezone(&Utc);
    let fields: Fields = rmp_serde::from_slice(&fields)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(LogicalRecord {
        table,
        key: RecordKey::parse(&key)?,
        version: to_version(version, "version")?,
        fields,
        origin: Origin::parse(&origin)?,
        updated_at,
        synced_version: synced_version
            .map(|v| to_version(v, "synced_version"))
            .transpose()?,
    })
}

impl RecordStore for SqliteStore {
    fn get(&self, table: Table, key: &RecordKey) -> Result<Option<LogicalRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE table_name = ?1 AND record_key = ?2"),
                rusqlite::params![table.as_str(), key.as_str()],
                raw_row,
            )
            .optional()?;
        raw.map(|raw| decode_row(table, raw)).transpose()
    }

    fn list(&self, table: Table) -> Result<Vec<LogicalRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE table_name = ?1 ORDER BY record_key"
        ))?;
        let rows = stmt.query_map(rusqlite::params![table.as_str()], raw_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(decode_row(table, row?)?);
        }
        Ok(result)
    }

    fn count(&self, table: Table) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE table_name = ?1",
            rusqlite::params![table.as_str()],
            |row| row.get(0),
        )?;
        to_version(count, "count")
    }

    fn put(&mut self, record: &LogicalRecord) -> Result<(), StorageError> {
        let fields = rmp_serde::to_vec(&record.fields)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO records (table_name, record_key, version, origin, synced_version, updated_at, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(table_name, record_key) DO UPDATE SET
                version = excluded.version,
                origin = excluded.origin,
                synced_version = excluded.synced_version,
                updated_at = excluded.updated_at,
                fields = excluded.fields",
            rusqlite::params![
                record.table.as_str(),
                record.key.as_str(),
                from_version(record.version)?,
                record.origin.as_str(),
                record.synced_version.map(from_version).transpose()?,
                record.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                fields,
            ],
        )?;
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &RecordKey) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM records WHERE table_name = ?1 AND record_key = ?2",
            rusqlite::params![table.as_str(), key.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::Transaction("transaction already open".into()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction("no open transaction".into()));
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction("no open transaction".into()));
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}
