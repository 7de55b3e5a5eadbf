//! In-memory record store.

use std::collections::BTreeMap;

use lorekeep_core::{LogicalRecord, RecordKey, Table};

use crate::error::StorageError;
use crate::traits::RecordStore;

type Records = BTreeMap<(Table, RecordKey), LogicalRecord>;

/// [`RecordStore`] backed by a `BTreeMap`.
///
/// A transaction snapshots the whole map on `begin` and restores it on
/// `rollback`. Suited to tests and short-lived sessions, not large libraries.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Records,
    snapshot: Option<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with records, outside any transaction.
    pub fn with_records(records: impl IntoIterator<Item = LogicalRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| ((r.table, r.key.clone()), r))
                .collect(),
            snapshot: None,
        }
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, table: Table, key: &RecordKey) -> Result<Option<LogicalRecord>, StorageError> {
        Ok(self.records.get(&(table, key.clone())).cloned())
    }

    fn list(&self, table: Table) -> Result<Vec<LogicalRecord>, StorageError> {
        Ok(self
            .records
            .values()
            .filter(|r| r.table == table)
            .cloned()
            .collect())
    }

    fn count(&self, table: Table) -> Result<u64, StorageError> {
        Ok(self.records.keys().filter(|(t, _)| *t == table).count() as u64)
    }

    fn put(&mut self, record: &LogicalRecord) -> Result<(), StorageError> {
        self.records
            .insert((record.table, record.key.clone()), record.clone());
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &RecordKey) -> Result<bool, StorageError> {
        Ok(self.records.remove(&(table, key.clone())).is_some())
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.snapshot.is_some() {
            return Err(StorageError::Transaction("transaction already open".into()));
        }
        self.snapshot = Some(self.records.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(StorageError::Transaction("no open transaction".into())),
        }
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.records = snapshot;
                Ok(())
            }
            None => Err(StorageError::Transaction("no open transaction".into())),
        }
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lorekeep_core::{Fields, Origin};

    fn record(table: Table, key: &str) -> LogicalRecord {
        LogicalRecord {
            table,
            key: RecordKey::parse(key).unwrap(),
            version: 1,
            fields: Fields::new(),
            origin: Origin::ReferenceDataset,
            updated_at: Utc::now(),
            synced_version: Some(1),
        }
    }

    #[test]
    fn tables_are_isolated() {
        let store = MemoryStore::with_records([
            record(Table::Spell, "shield"),
            record(Table::Item, "shield"),
            record(Table::Spell, "fireball"),
        ]);
        let spells: Vec<String> = store
            .list(Table::Spell)
            .unwrap()
            .into_iter()
            .map(|r| r.key.to_string())
            .collect();
        assert_eq!(spells, vec!["fireball", "shield"]);
        assert_eq!(store.count(Table::Item).unwrap(), 1);
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut store = MemoryStore::with_records([record(Table::Spell, "shield")]);
        store.begin().unwrap();
        store.put(&record(Table::Spell, "fireball")).unwrap();
        store
            .delete(Table::Spell, &RecordKey::parse("shield").unwrap())
            .unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count(Table::Spell).unwrap(), 1);
        assert!(!store.in_transaction());
        assert!(matches!(store.rollback(), Err(StorageError::Transaction(_))));
    }
}
