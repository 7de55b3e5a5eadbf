//! Upsert decisions for one incoming record against the stored state.
//!
//! [`classify`] is the dry run used by restore planning; [`materialize`]
//! turns a decision into the record to write. The engine runs both inside
//! a store transaction.

use std::fmt;

use chrono::Utc;
use thiserror::Error;

use lorekeep_core::{
    fields_digest, LogicalRecord, Origin, RecordKey, Schema, Table, ValidatedRecord, MAX_VERSION,
};

use crate::diff::RecordDiff;
use crate::error::EngineError;
use crate::import::ConfirmationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilePolicy {
    /// Reference re-import: never overwrite local user edits.
    Auto,
    /// Confirmed restore: overwrite unconditionally.
    Force,
    /// Generator import: writes require a confirmation token.
    Manual(Option<ConfirmationToken>),
}

impl ReconcilePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Force => "force",
            Self::Manual(_) => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictReason {
    /// The stored record is user-owned and edited since its last sync.
    LocallyModified,
    /// The store moved on after the incoming record was confirmed.
    StaleConfirmation {
        confirmed: Option<u64>,
        current: Option<u64>,
    },
    /// The update would change the field that qualifies the record's key.
    QualifierChanged { field: String },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn version(v: &Option<u64>) -> String {
            v.map_or_else(|| "absent".to_string(), |v| format!("version {v}"))
        }
        match self {
            Self::LocallyModified => write!(f, "modified locally since last sync"),
            Self::StaleConfirmation { confirmed, current } => write!(
                f,
                "confirmed against {}, store now has {}",
                version(confirmed),
                version(current)
            ),
            Self::QualifierChanged { field } => write!(f, "incoming record changes its {field}"),
        }
    }
}

/// A divergent record the engine refused to overwrite.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("conflict on {table} record {key}: {reason}")]
pub struct Conflict {
    pub table: Table,
    pub key: RecordKey,
    pub reason: ConflictReason,
    /// Stored record at decision time, if any.
    pub local: Option<LogicalRecord>,
    pub diff: RecordDiff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Inserted { version: u64 },
    Updated { from: u64, to: u64 },
    Unchanged { version: u64 },
    Conflict(Conflict),
}

impl ReconcileOutcome {
    /// True if the outcome writes to the store.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Inserted { .. } | Self::Updated { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Updated { .. } => "updated",
            Self::Unchanged { .. } => "unchanged",
            Self::Conflict(_) => "conflict",
        }
    }
}

/// The version after `current`, refusing to pass [`MAX_VERSION`].
pub fn next_version(current: &LogicalRecord) -> Result<u64, EngineError> {
    current
        .version
        .checked_add(1)
        .filter(|v| *v <= MAX_VERSION)
        .ok_or_else(|| EngineError::VersionExhausted {
            table: current.table,
            key: current.key.to_string(),
        })
}

fn check_token(
    token: &ConfirmationToken,
    current: Option<&LogicalRecord>,
    incoming: &ValidatedRecord,
) -> Result<(), EngineError> {
    let digest = fields_digest(&incoming.fields)?;
    if !token.covers(incoming.table, &incoming.key, &digest) {
        return Err(EngineError::ConfirmationRequired(format!(
            "token does not cover these fields of {} record {}",
            incoming.table, incoming.key
        )));
    }
    let current_version = current.map(|c| c.version);
    if token.base_version() != current_version {
        return Err(Conflict {
            table: incoming.table,
            key: incoming.key.clone(),
            reason: ConflictReason::StaleConfirmation {
                confirmed: token.base_version(),
                current: current_version,
            },
            local: current.cloned(),
            diff: RecordDiff::between(current.map(|c| &c.fields), &incoming.fields),
        }
        .into());
    }
    Ok(())
}

fn confirmation_required(incoming: &ValidatedRecord) -> EngineError {
    EngineError::ConfirmationRequired(format!(
        "manual import of {} record {} needs a confirmation token",
        incoming.table, incoming.key
    ))
}

/// Decide what reconciling `incoming` would do. Never writes.
///
/// Fails with `ConfirmationRequired` for a manual write without a matching
/// token, and with `Conflict` for a token confirmed against another version.
pub fn classify(
    current: Option<&LogicalRecord>,
    incoming: &ValidatedRecord,
    policy: &ReconcilePolicy,
) -> Result<ReconcileOutcome, EngineError> {
    if let ReconcilePolicy::Manual(Some(token)) = policy {
        check_token(token, current, incoming)?;
    }

    let Some(current) = current else {
        return match policy {
            ReconcilePolicy::Force => Ok(ReconcileOutcome::Inserted {
                version: incoming.version.max(1),
            }),
            ReconcilePolicy::Manual(None) => Err(confirmation_required(incoming)),
            _ => Ok(ReconcileOutcome::Inserted { version: 1 }),
        };
    };

    if current.fields == incoming.fields {
        return Ok(ReconcileOutcome::Unchanged {
            version: current.version,
        });
    }

    let from = current.version;
    match policy {
        ReconcilePolicy::Auto => {
            if current.origin != Origin::User || current.is_unmodified_since_sync() {
                Ok(ReconcileOutcome::Updated {
                    from,
                    to: next_version(current)?,
                })
            } else {
                Ok(ReconcileOutcome::Conflict(Conflict {
                    table: current.table,
                    key: current.key.clone(),
                    reason: ConflictReason::LocallyModified,
                    local: Some(current.clone()),
                    diff: RecordDiff::between(Some(&current.fields), &incoming.fields),
                }))
            }
        }
        ReconcilePolicy::Force => {
            let to = if incoming.version > from {
                incoming.version
            } else {
                next_version(current)?
            };
            Ok(ReconcileOutcome::Updated { from, to })
        }
        ReconcilePolicy::Manual(None) => Err(confirmation_required(incoming)),
        ReconcilePolicy::Manual(Some(_)) => Ok(ReconcileOutcome::Updated {
            from,
            to: next_version(current)?,
        }),
    }
}

/// [`classify`] with the checks that need the table's schema.
///
/// Under `auto`, an update that changes the schema's key qualifier (a
/// campaign entity turning from quest into location, say) is a conflict.
pub fn classify_for(
    schema: &Schema,
    current: Option<&LogicalRecord>,
    incoming: &ValidatedRecord,
    policy: &ReconcilePolicy,
) -> Result<ReconcileOutcome, EngineError> {
    let outcome = classify(current, incoming, policy)?;
    if let (ReconcilePolicy::Auto, ReconcileOutcome::Updated { .. }, Some(field), Some(current)) =
        (policy, &outcome, schema.key_qualifier.as_deref(), current)
    {
        if current.fields.get(field) != incoming.fields.get(field) {
            return Ok(ReconcileOutcome::Conflict(Conflict {
                table: current.table,
                key: current.key.clone(),
                reason: ConflictReason::QualifierChanged {
                    field: field.to_string(),
                },
                local: Some(current.clone()),
                diff: RecordDiff::between(Some(&current.fields), &incoming.fields),
            }));
        }
    }
    Ok(outcome)
}

/// The record to store for a writing outcome, `None` otherwise.
///
/// Forced writes reproduce the incoming envelope when the version lands on
/// the incoming value. Reference and generated writes mark the record as
/// synced at its new version; user-origin writes keep the previous marker.
pub fn materialize(
    current: Option<&LogicalRecord>,
    incoming: &ValidatedRecord,
    outcome: &ReconcileOutcome,
    policy: &ReconcilePolicy,
) -> Option<LogicalRecord> {
    let version = match outcome {
        ReconcileOutcome::Inserted { version } => *version,
        ReconcileOutcome::Updated { to, .. } => *to,
        ReconcileOutcome::Unchanged { .. } | ReconcileOutcome::Conflict(_) => return None,
    };

    let mut record = incoming.record().clone();
    record.version = version;

    if *policy == ReconcilePolicy::Force {
        if version != incoming.version {
            record.updated_at = Utc::now();
            record.synced_version = None;
        }
        return Some(record);
    }

    record.updated_at = Utc::now();
    record.synced_version = match incoming.origin {
        Origin::ReferenceDataset | Origin::Generated => Some(version),
        Origin::User => current.and_then(|c| c.synced_version),
    };
    Some(record)
}
