use std::collections::BTreeMap;

use lorekeep_core::{ArchivedRecord, RecordKey, SchemaRegistry, Table, ValidationError};
use lorekeep_storage::RecordStore;

use crate::archive::{Bundle, Manifest};
use crate::diff::RecordDiff;
use crate::error::EngineError;
use crate::reconcile::{classify_for, ReconcileOutcome, ReconcilePolicy};

/// What a confirmed restore would do to one record, judged with the same
/// rules a reference re-import uses. `Conflict` marks a locally edited user
/// record that the forced restore will overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Insert,
    Update,
    Conflict,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub table: Table,
    pub key: RecordKey,
    pub action: PlanAction,
    pub diff: RecordDiff,
    pub(crate) archived: ArchivedRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub insert: usize,
    pub update: usize,
    pub conflict: usize,
    pub unchanged: usize,
    pub rejected: usize,
}

/// Classification of every bundle record against the store, not yet applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePlan {
    pub manifest: Manifest,
    pub entries: Vec<PlanEntry>,
    /// Records that failed validation. A plan with any cannot be applied.
    pub rejected: Vec<ValidationError>,
}

impl RestorePlan {
    pub fn is_applicable(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn summary(&self) -> BTreeMap<Table, PlanCounts> {
        let mut summary: BTreeMap<Table, PlanCounts> = BTreeMap::new();
        for entry in &self.entries {
            let counts = summary.entry(entry.table).or_default();
            match entry.action {
                PlanAction::Insert => counts.insert += 1,
                PlanAction::Update => counts.update += 1,
                PlanAction::Conflict => counts.conflict += 1,
                PlanAction::Unchanged => counts.unchanged += 1,
            }
        }
        for err in &self.rejected {
            summary.entry(err.table).or_default().rejected += 1;
        }
        summary
    }

    pub fn count(&self, action: PlanAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub tables: BTreeMap<Table, RestoreCounts>,
}

impl RestoreReport {
    pub(crate) fn record(&mut self, table: Table, outcome: &ReconcileOutcome) {
        let counts = self.tables.entry(table).or_default();
        match outcome {
            ReconcileOutcome::Inserted { .. } => counts.inserted += 1,
            ReconcileOutcome::Updated { .. } => counts.updated += 1,
            ReconcileOutcome::Unchanged { .. } | ReconcileOutcome::Conflict(_) => counts.unchanged += 1,
        }
    }

    /// Records written across all tables.
    pub fn applied(&self) -> usize {
        self.tables.values().map(|c| c.inserted + c.updated).sum()
    }
}

/// Validate and dry-run every record of a decoded bundle.
pub fn plan<S: RecordStore>(
    store: &S,
    registry: &SchemaRegistry,
    bundle: Bundle,
) -> Result<RestorePlan, EngineError> {
    let mut entries = Vec::new();
    let mut rejected = Vec::new();

    for (table, records) in bundle.tables {
        let schema = registry.schema_for(table)?;
        for archived in records {
            let record = match schema.validate_archived(&archived) {
                Ok(record) => record,
                Err(err) => {
                    rejected.push(err);
                    continue;
                }
            };
            let current = store.get(table, &record.key)?;
            let action = match classify_for(schema, current.as_ref(), &record, &ReconcilePolicy::Auto)? {
                ReconcileOutcome::Inserted { .. } => PlanAction::Insert,
                ReconcileOutcome::Updated { .. } => PlanAction::Update,
                ReconcileOutcome::Unchanged { .. } => PlanAction::Unchanged,
                ReconcileOutcome::Conflict(_) => PlanAction::Conflict,
            };
            entries.push(PlanEntry {
                table,
                key: record.key.clone(),
                action,
                diff: RecordDiff::between(current.as_ref().map(|c| &c.fields), &record.fields),
                archived,
            });
        }
    }

    Ok(RestorePlan {
        manifest: bundle.manifest,
        entries,
        rejected,
    })
}
