pub mod archive;
pub mod config;
pub mod diff;
pub mod error;
pub mod import;
pub mod migrate;
pub mod reconcile;
pub mod restore;

pub use archive::{Bundle, ExportedArchive, Manifest, TableEntry};
pub use config::EngineConfig;
pub use diff::{ChangeKind, FieldChange, RecordDiff};
pub use error::EngineError;
pub use import::{ConfirmationToken, ImportEntry, ImportPreview, ImportReport, ImportStatus};
pub use reconcile::{Conflict, ConflictReason, ReconcileOutcome, ReconcilePolicy};
pub use restore::{PlanAction, PlanCounts, PlanEntry, RestoreCounts, RestorePlan, RestoreReport};

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use lorekeep_core::{
    LogicalRecord, Origin, RecordKey, Schema, SchemaRegistry, Table, ValidatedRecord,
};
use lorekeep_storage::RecordStore;

use crate::reconcile::{classify_for, materialize, next_version};

/// Import, export and reconciliation over one record store.
pub struct Engine<S: RecordStore> {
    store: S,
    registry: SchemaRegistry,
    config: EngineConfig,
}

impl<S: RecordStore> Engine<S> {
    /// Engine with the built-in schemas and default config.
    pub fn new(store: S) -> Self {
        Self::with_config(store, SchemaRegistry::builtin(), EngineConfig::default())
    }

    pub fn with_config(store: S, registry: SchemaRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Register or replace the schema of a table. Takes effect for every
    /// later validation, including re-validation of pending restore plans.
    pub fn register_schema(&mut self, schema: Schema) {
        self.registry.register(schema);
    }

    pub fn schema_for(&self, table: Table) -> Result<&Schema, EngineError> {
        Ok(self.registry.schema_for(table)?)
    }

    /// Field hints to hand the generator for `table`.
    pub fn request_template(&self, table: Table) -> Result<Value, EngineError> {
        Ok(self.schema_for(table)?.request_template())
    }

    /// Run `f` inside a store transaction. Any error rolls back.
    fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut S, &SchemaRegistry) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.store.begin()?;

        let result = f(&mut self.store, &self.registry);

        match result {
            Ok(value) => match self.store.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = self.store.rollback();
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.store.rollback();
                Err(e)
            }
        }
    }

    // -- Validation and reconciliation --

    pub fn validate(&self, table: Table, payload: &Value, origin: Origin) -> Result<ValidatedRecord, EngineError> {
        Ok(self.schema_for(table)?.validate_payload(payload, origin)?)
    }

    /// Reconcile one validated record into the store.
    #[instrument(skip(self, record), fields(table = %record.table, key = %record.key, policy = policy.name()))]
    pub fn reconcile(
        &mut self,
        record: &ValidatedRecord,
        policy: ReconcilePolicy,
    ) -> Result<ReconcileOutcome, EngineError> {
        self.in_transaction(|store, registry| {
            reconcile_in(store, registry.schema_for(record.table)?, record, &policy)
        })
    }

    // -- User records --

    /// Validate and insert a new user record under a fresh key.
    #[instrument(skip(self, payload), fields(table = %table))]
    pub fn create_user_record(&mut self, table: Table, payload: &Value) -> Result<LogicalRecord, EngineError> {
        let record = self.validate(table, payload, Origin::User)?;
        let mut record = record.into_record();
        record.version = 1;
        record.updated_at = Utc::now();
        record.synced_version = None;

        self.in_transaction(|store, _| {
            store.put(&record)?;
            Ok(())
        })?;
        debug!(key = %record.key, "created user record");
        Ok(record)
    }

    /// Replace the fields of an existing record with a user edit.
    ///
    /// The record becomes user-owned and its sync marker is kept, so an edit
    /// after a sync protects it from later reference re-imports.
    #[instrument(skip(self, payload), fields(table = %table, key = %key))]
    pub fn edit_user_record(
        &mut self,
        table: Table,
        key: &RecordKey,
        payload: &Value,
    ) -> Result<ReconcileOutcome, EngineError> {
        let incoming = self
            .schema_for(table)?
            .validate_keyed(key.clone(), payload, Origin::User)?;

        self.in_transaction(|store, _| {
            let current = store.get(table, key)?.ok_or_else(|| EngineError::NotFound {
                table,
                key: key.to_string(),
            })?;
            if current.fields == incoming.fields {
                return Ok(ReconcileOutcome::Unchanged {
                    version: current.version,
                });
            }
            let mut record = incoming.into_record();
            record.version = next_version(&current)?;
            record.synced_version = current.synced_version;
            record.updated_at = Utc::now();
            store.put(&record)?;
            debug!(from = current.version, to = record.version, "edited record");
            Ok(ReconcileOutcome::Updated {
                from: current.version,
                to: record.version,
            })
        })
    }

    /// Delete a record immediately. Returns whether it existed.
    #[instrument(skip(self), fields(table = %table, key = %key))]
    pub fn delete_record(&mut self, table: Table, key: &RecordKey) -> Result<bool, EngineError> {
        self.in_transaction(|store, _| Ok(store.delete(table, key)?))
    }

    pub fn get(&self, table: Table, key: &RecordKey) -> Result<Option<LogicalRecord>, EngineError> {
        Ok(self.store.get(table, key)?)
    }

    pub fn list(&self, table: Table) -> Result<Vec<LogicalRecord>, EngineError> {
        Ok(self.store.list(table)?)
    }

    // -- Reference and generator imports --

    /// Import a batch of reference payloads with the `auto` policy.
    ///
    /// Invalid payloads are reported and skipped. Each valid payload is
    /// reconciled in its own transaction; a storage error stops the batch
    /// and leaves earlier payloads applied.
    #[instrument(skip(self, payloads), fields(table = %table, payloads = payloads.len()))]
    pub fn import_reference(&mut self, table: Table, payloads: &[Value]) -> Result<ImportReport, EngineError> {
        let mut report = ImportReport::new(table);
        for (index, payload) in payloads.iter().enumerate() {
            let record = match self.schema_for(table)?.validate_payload(payload, Origin::ReferenceDataset) {
                Ok(record) => record,
                Err(err) => {
                    debug!(index, %err, "rejected reference payload");
                    report.entries.push(ImportEntry {
                        index,
                        key: None,
                        status: ImportStatus::Rejected(err),
                    });
                    continue;
                }
            };
            let outcome = self.in_transaction(|store, registry| {
                reconcile_in(store, registry.schema_for(table)?, &record, &ReconcilePolicy::Auto)
            })?;
            report.entries.push(ImportEntry {
                index,
                key: Some(record.key.clone()),
                status: ImportStatus::Reconciled(outcome),
            });
        }
        info!(
            imported = report.imported(),
            skipped = report.skipped(),
            conflicts = report.conflicts(),
            "reference import finished"
        );
        Ok(report)
    }

    /// Validate a generator payload and diff it against the store.
    #[instrument(skip(self, payload), fields(table = %table))]
    pub fn preview_generated(&self, table: Table, payload: &Value) -> Result<ImportPreview, EngineError> {
        let record = self.schema_for(table)?.validate_payload(payload, Origin::Generated)?;
        let current = self.store.get(table, &record.key)?;
        Ok(ImportPreview::new(record, current))
    }

    /// Apply a previewed generator record with the `manual` policy.
    #[instrument(skip(self, preview, token), fields(table = %preview.record.table, key = %preview.record.key))]
    pub fn commit_generated(
        &mut self,
        preview: &ImportPreview,
        token: Option<ConfirmationToken>,
    ) -> Result<ReconcileOutcome, EngineError> {
        let policy = ReconcilePolicy::Manual(token);
        self.in_transaction(|store, registry| {
            reconcile_in(store, registry.schema_for(preview.record.table)?, &preview.record, &policy)
        })
    }

    // -- Export and restore --

    /// Snapshot every registered table and encode it as a bundle.
    #[instrument(skip(self))]
    pub fn export(&mut self) -> Result<ExportedArchive, EngineError> {
        let snapshot = self.in_transaction(|store, registry| {
            let mut snapshot = BTreeMap::new();
            for table in registry.tables() {
                snapshot.insert(table, store.list(table)?);
            }
            Ok(snapshot)
        })?;

        let created_at = Utc::now();
        let (manifest, bytes) = archive::encode(&snapshot, created_at, self.config.pretty_tables)?;
        let file_name = archive::archive_file_name(&self.config.archive_prefix, created_at);
        info!(
            file_name = %file_name,
            records = snapshot.values().map(Vec::len).sum::<usize>(),
            bytes = bytes.len(),
            "exported archive"
        );
        Ok(ExportedArchive {
            file_name,
            bytes,
            manifest,
        })
    }

    /// Decode a bundle and classify every record against the store.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn plan_restore(&self, bytes: &[u8]) -> Result<RestorePlan, EngineError> {
        let bundle = archive::decode(bytes, self.config.max_archive_bytes)?;
        self.plan_bundle(bundle)
    }

    pub fn plan_restore_file(&self, path: &Path) -> Result<RestorePlan, EngineError> {
        let bytes = std::fs::read(path)?;
        self.plan_restore(&bytes)
    }

    pub fn plan_bundle(&self, bundle: Bundle) -> Result<RestorePlan, EngineError> {
        let plan = restore::plan(&self.store, &self.registry, bundle)?;
        debug!(
            entries = plan.entries.len(),
            rejected = plan.rejected.len(),
            "planned restore"
        );
        Ok(plan)
    }

    /// Apply a restore plan with the `force` policy in one transaction.
    ///
    /// Every record is validated again against the current schemas; any
    /// failure leaves the store exactly as it was.
    #[instrument(skip(self, plan), fields(entries = plan.entries.len()))]
    pub fn apply_restore(&mut self, plan: &RestorePlan, confirmed: bool) -> Result<RestoreReport, EngineError> {
        if !confirmed {
            warn!("restore not confirmed");
            return Err(EngineError::ConfirmationRequired(format!(
                "restore of {} records was not confirmed",
                plan.entries.len()
            )));
        }
        if let Some(err) = plan.rejected.first() {
            warn!(rejected = plan.rejected.len(), "refusing restore plan with rejected records");
            return Err(err.clone().into());
        }

        let report = self.in_transaction(|store, registry| {
            let mut report = RestoreReport::default();
            for entry in &plan.entries {
                let schema = registry.schema_for(entry.table)?;
                let record = schema.validate_archived(&entry.archived)?;
                let outcome = reconcile_in(store, schema, &record, &ReconcilePolicy::Force)?;
                report.record(entry.table, &outcome);
            }
            Ok(report)
        });

        match &report {
            Ok(report) => info!(applied = report.applied(), "restore applied"),
            Err(err) => warn!(%err, "restore rolled back"),
        }
        report
    }
}

/// Classify and apply one record. Callers own the transaction.
fn reconcile_in<S: RecordStore>(
    store: &mut S,
    schema: &Schema,
    incoming: &ValidatedRecord,
    policy: &ReconcilePolicy,
) -> Result<ReconcileOutcome, EngineError> {
    let current = store.get(incoming.table, &incoming.key)?;
    let outcome = classify_for(schema, current.as_ref(), incoming, policy)?;
    if let Some(record) = materialize(current.as_ref(), incoming, &outcome, policy) {
        store.put(&record)?;
    }
    match &outcome {
        ReconcileOutcome::Conflict(conflict) => warn!(%conflict, "reconcile conflict"),
        other => debug!(
            table = %incoming.table,
            key = %incoming.key,
            outcome = other.as_str(),
            "reconciled"
        ),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_storage::MemoryStore;
    use serde_json::json;

    fn owlbear() -> Value {
        json!({
            "name": "Owlbear",
            "hit_points": "59 (7d10+21)",
            "armor_class": "13",
            "challenge": "3 (700 XP)",
        })
    }

    #[test]
    fn reference_import_is_idempotent() {
        let mut engine = Engine::new(MemoryStore::new());
        let first = engine.import_reference(Table::Creature, &[owlbear()]).unwrap();
        let second = engine.import_reference(Table::Creature, &[owlbear()]).unwrap();
        assert_eq!(first.inserted(), 1);
        assert_eq!(second.unchanged(), 1);
        assert_eq!(second.imported(), 0);
    }

    #[test]
    fn edit_keeps_sync_marker_and_bumps_version() {
        let mut engine = Engine::new(MemoryStore::new());
        engine.import_reference(Table::Creature, &[owlbear()]).unwrap();
        let key = RecordKey::from_name("Owlbear").unwrap();

        let mut edited = owlbear();
        edited["armor_class"] = json!("15");
        let outcome = engine.edit_user_record(Table::Creature, &key, &edited).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated { from: 1, to: 2 });

        let stored = engine.get(Table::Creature, &key).unwrap().unwrap();
        assert_eq!(stored.origin, Origin::User);
        assert_eq!(stored.synced_version, Some(1));
        assert!(!stored.is_unmodified_since_sync());
    }

    #[test]
    fn edit_of_missing_record_is_not_found() {
        let mut engine = Engine::new(MemoryStore::new());
        let key = RecordKey::from_name("Owlbear").unwrap();
        assert!(matches!(
            engine.edit_user_record(Table::Creature, &key, &owlbear()),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn unconfirmed_restore_is_refused() {
        let mut engine = Engine::new(MemoryStore::new());
        let archive = engine.export().unwrap();
        let plan = engine.plan_restore(&archive.bytes).unwrap();
        assert!(matches!(
            engine.apply_restore(&plan, false),
            Err(EngineError::ConfirmationRequired(_))
        ));
    }
}
