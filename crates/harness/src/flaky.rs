use std::cell::Cell;

use lorekeep_core::{LogicalRecord, RecordKey, Table};
use lorekeep_storage::{RecordStore, StorageError};

/// Store wrapper that starts failing writes after a set number of puts.
pub struct FlakyStore<S> {
    inner: S,
    puts_left: Cell<Option<usize>>,
}

impl<S: RecordStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            puts_left: Cell::new(None),
        }
    }

    /// Allow `n` more puts, then fail every put until [`Self::heal`].
    pub fn fail_after_puts(&self, n: usize) {
        self.puts_left.set(Some(n));
    }

    pub fn heal(&self) {
        self.puts_left.set(None);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: RecordStore> RecordStore for FlakyStore<S> {
    fn get(&self, table: Table, key: &RecordKey) -> Result<Option<LogicalRecord>, StorageError> {
        self.inner.get(table, key)
    }

    fn list(&self, table: Table) -> Result<Vec<LogicalRecord>, StorageError> {
        self.inner.list(table)
    }

    fn count(&self, table: Table) -> Result<u64, StorageError> {
        self.inner.count(table)
    }

    fn put(&mut self, record: &LogicalRecord) -> Result<(), StorageError> {
        match self.puts_left.get() {
            Some(0) => Err(StorageError::Unavailable(format!(
                "injected failure writing {}/{}",
                record.table, record.key
            ))),
            Some(n) => {
                self.puts_left.set(Some(n - 1));
                self.inner.put(record)
            }
            None => self.inner.put(record),
        }
    }

    fn delete(&mut self, table: Table, key: &RecordKey) -> Result<bool, StorageError> {
        self.inner.delete(table, key)
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}
