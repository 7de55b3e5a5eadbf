use serde_json::Value;
use tempfile::TempDir;

use lorekeep_core::{LogicalRecord, RecordKey, Table};
use lorekeep_engine::{Engine, ImportReport};
use lorekeep_storage::{SqliteStore, StorageError};

/// An engine over a fresh SQLite store.
pub struct TestSession {
    pub engine: Engine<SqliteStore>,
    // Keeps the on-disk database alive for the session.
    _dir: Option<TempDir>,
}

impl TestSession {
    pub fn new() -> Result<Self, StorageError> {
        crate::init_test_tracing();
        Ok(Self {
            engine: Engine::new(SqliteStore::open_in_memory()?),
            _dir: None,
        })
    }

    /// Session backed by a database file in a temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        crate::init_test_tracing();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lorekeep.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        Ok(Self {
            engine: Engine::new(SqliteStore::open(path)?),
            _dir: Some(dir),
        })
    }

    pub fn import(&mut self, table: Table, payloads: &[Value]) -> Result<ImportReport, Box<dyn std::error::Error>> {
        Ok(self.engine.import_reference(table, payloads)?)
    }

    /// Fetch a record by the key derived from its name.
    pub fn by_name(&self, table: Table, name: &str) -> Result<Option<LogicalRecord>, Box<dyn std::error::Error>> {
        let key = RecordKey::from_name(name).ok_or("name yields no key")?;
        Ok(self.engine.get(table, &key)?)
    }

    /// Every record of every table, for whole-store comparisons.
    pub fn dump(&self) -> Result<Vec<LogicalRecord>, Box<dyn std::error::Error>> {
        let mut records = Vec::new();
        for table in Table::ALL {
            records.extend(self.engine.list(table)?);
        }
        Ok(records)
    }
}
