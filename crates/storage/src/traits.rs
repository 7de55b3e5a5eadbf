use lorekeep_core::{LogicalRecord, RecordKey, Table};

use crate::error::StorageError;

/// Record storage the reconciliation engine writes through.
///
/// Transactions are flat: `begin` fails if one is already open, and every
/// write between `begin` and `commit` is undone by `rollback`.
pub trait RecordStore {
    fn get(&self, table: Table, key: &RecordKey) -> Result<Option<LogicalRecord>, StorageError>;

    /// All records of a table, ordered by key.
    fn list(&self, table: Table) -> Result<Vec<LogicalRecord>, StorageError>;

    fn count(&self, table: Table) -> Result<u64, StorageError>;

    /// Insert or replace the record stored under `(record.table, record.key)`.
    fn put(&mut self, record: &LogicalRecord) -> Result<(), StorageError>;

    /// Returns whether a record was removed.
    fn delete(&mut self, table: Table, key: &RecordKey) -> Result<bool, StorageError>;

    fn begin(&mut self) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;

    fn rollback(&mut self) -> Result<(), StorageError>;

    fn in_transaction(&self) -> bool;
}
