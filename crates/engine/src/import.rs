use lorekeep_core::{fields_digest, LogicalRecord, RecordKey, Table, ValidatedRecord, ValidationError};

use crate::diff::RecordDiff;
use crate::error::EngineError;
use crate::reconcile::ReconcileOutcome;

/// Proof that a user reviewed one specific incoming field set.
///
/// Bound to the table, the key, the store version the review was shown
/// against and a digest of the reviewed fields. Only [`ImportPreview::confirm`]
/// creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationToken {
    table: Table,
    key: RecordKey,
    base_version: Option<u64>,
    digest: [u8; 32],
}

impl ConfirmationToken {
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Store version the review saw, `None` if the record did not exist.
    pub fn base_version(&self) -> Option<u64> {
        self.base_version
    }

    pub(crate) fn covers(&self, table: Table, key: &RecordKey, digest: &[u8; 32]) -> bool {
        self.table == table && &self.key == key && &self.digest == digest
    }
}

/// A validated generator record and what importing it would change.
#[derive(Debug, Clone)]
pub struct ImportPreview {
    pub record: ValidatedRecord,
    pub current: Option<LogicalRecord>,
    pub diff: RecordDiff,
}

impl ImportPreview {
    pub(crate) fn new(record: ValidatedRecord, current: Option<LogicalRecord>) -> Self {
        let diff = RecordDiff::between(current.as_ref().map(|c| &c.fields), &record.fields);
        Self {
            record,
            current,
            diff,
        }
    }

    pub fn is_new(&self) -> bool {
        self.current.is_none()
    }

    /// Issue the token that lets [`crate::Engine::commit_generated`] write
    /// exactly this record.
    pub fn confirm(&self) -> Result<ConfirmationToken, EngineError> {
        Ok(ConfirmationToken {
            table: self.record.table,
            key: self.record.key.clone(),
            base_version: self.current.as_ref().map(|c| c.version),
            digest: fields_digest(&self.record.fields)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportStatus {
    Reconciled(ReconcileOutcome),
    Rejected(ValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportEntry {
    /// Position of the payload in the submitted batch.
    pub index: usize,
    pub key: Option<RecordKey>,
    pub status: ImportStatus,
}

/// Per-payload results of a reference batch import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub table: Table,
    pub entries: Vec<ImportEntry>,
}

impl ImportReport {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            entries: Vec::new(),
        }
    }

    fn count(&self, pred: impl Fn(&ImportStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }

    pub fn inserted(&self) -> usize {
        self.count(|s| matches!(s, ImportStatus::Reconciled(ReconcileOutcome::Inserted { .. })))
    }

    pub fn updated(&self) -> usize {
        self.count(|s| matches!(s, ImportStatus::Reconciled(ReconcileOutcome::Updated { .. })))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, ImportStatus::Reconciled(ReconcileOutcome::Unchanged { .. })))
    }

    pub fn conflicts(&self) -> usize {
        self.count(|s| matches!(s, ImportStatus::Reconciled(ReconcileOutcome::Conflict(_))))
    }

    pub fn rejected(&self) -> impl Iterator<Item = &ValidationError> {
        self.entries.iter().filter_map(|e| match &e.status {
            ImportStatus::Rejected(err) => Some(err),
            ImportStatus::Reconciled(_) => None,
        })
    }

    /// Payloads that were written.
    pub fn imported(&self) -> usize {
        self.inserted() + self.updated()
    }

    /// Payloads that were not written, for any reason.
    pub fn skipped(&self) -> usize {
        self.entries.len() - self.imported()
    }
}
