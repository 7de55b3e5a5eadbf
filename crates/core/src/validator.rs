//! Applies a [`Schema`] to untyped payloads.
//!
//! Validation is pure and fails closed: unknown fields are rejected, and
//! every violation in a payload is collected before returning so a caller
//! can show the complete correction list at once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::field_value::{json_type_name, FieldValue, Fields};
use crate::ids::{Origin, RecordKey, Table};
use crate::record::{ArchivedRecord, LogicalRecord, ValidatedRecord, MAX_VERSION};
use crate::schema::{Constraint, FieldSpec, FieldType, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationReason {
    Missing,
    UnknownField,
    TypeMismatch { expected: String, found: &'static str },
    OutOfRange { min: i64, max: i64, actual: f64 },
    NotOneOf { allowed: Vec<String>, found: String },
    Empty,
    DerivedMismatch { expected: String, found: String },
    InvalidKey,
    /// Two mapping keys that normalize to the same spelling.
    DuplicateKey { canonical: String },
    InvalidEnvelope(String),
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::UnknownField => write!(f, "unknown field"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Self::OutOfRange { min, max, actual } => {
                if *max == i64::MAX && *actual < *min as f64 {
                    write!(f, "{actual} is below the minimum of {min}")
                } else if *max == i64::MAX {
                    write!(f, "{actual} is above the maximum of {max}")
                } else {
                    write!(f, "{actual} is outside {min}..={max}")
                }
            }
            Self::NotOneOf { allowed, found } => {
                write!(f, "'{found}' is not one of: {}", allowed.join(", "))
            }
            Self::Empty => write!(f, "must not be empty"),
            Self::DerivedMismatch { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Self::InvalidKey => write!(f, "does not yield a usable key"),
            Self::DuplicateKey { canonical } => write!(f, "duplicates key {canonical}"),
            Self::InvalidEnvelope(detail) => write!(f, "{detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub field: String,
    pub reason: ViolationReason,
}

impl Violation {
    pub fn new(field: impl Into<String>, reason: ViolationReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{table} record {} failed validation: {}", .key.as_deref().unwrap_or("<new>"), render(.violations))]
pub struct ValidationError {
    pub table: Table,
    pub key: Option<String>,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// True if `field` has a violation with exactly this reason.
    pub fn has(&self, field: &str, reason: &ViolationReason) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == field && &v.reason == reason)
    }
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Schema {
    /// Validate a payload's fields. Pure; never touches storage.
    pub fn validate_fields(&self, payload: &Value) -> Result<Fields, Vec<Violation>> {
        let mut violations = Vec::new();
        let fields = self.collect_fields(payload, &mut violations);
        if violations.is_empty() {
            Ok(fields)
        } else {
            Err(violations)
        }
    }

    /// Validate an imported payload into a record ready for reconciliation.
    ///
    /// Reference and generated records are keyed by their normalized name;
    /// user records receive a fresh opaque key.
    pub fn validate_payload(
        &self,
        payload: &Value,
        origin: Origin,
    ) -> Result<ValidatedRecord, ValidationError> {
        let mut violations = Vec::new();
        let fields = self.collect_fields(payload, &mut violations);

        let key = match origin {
            Origin::User => Some(RecordKey::generate()),
            Origin::ReferenceDataset | Origin::Generated => self.derive_key(&fields, &mut violations),
        };

        self.finish(key, fields, origin, violations, None)
    }

    /// Key of a reference or generated record: the normalized key field,
    /// prefixed by the qualifier field when the schema declares one.
    fn derive_key(&self, fields: &Fields, violations: &mut Vec<Violation>) -> Option<RecordKey> {
        // Missing key or qualifier fields are already reported.
        let name = fields.get(&self.key_field).and_then(FieldValue::as_text)?;
        if RecordKey::from_name(name).is_none() {
            violations.push(Violation::new(&self.key_field, ViolationReason::InvalidKey));
            return None;
        }
        match &self.key_qualifier {
            Some(field) => {
                let qualifier = fields.get(field).and_then(FieldValue::as_text)?;
                let key = RecordKey::from_name(&format!("{qualifier} {name}"));
                if key.is_none() {
                    violations.push(Violation::new(field, ViolationReason::InvalidKey));
                }
                key
            }
            None => RecordKey::from_name(name),
        }
    }

    /// Validate a payload for a record whose key is already assigned.
    pub fn validate_keyed(
        &self,
        key: RecordKey,
        payload: &Value,
        origin: Origin,
    ) -> Result<ValidatedRecord, ValidationError> {
        let mut violations = Vec::new();
        let fields = self.collect_fields(payload, &mut violations);
        self.finish(Some(key), fields, origin, violations, None)
    }

    /// Validate a record read back from an archive, envelope included.
    pub fn validate_archived(
        &self,
        archived: &ArchivedRecord,
    ) -> Result<ValidatedRecord, ValidationError> {
        let mut violations = Vec::new();
        if archived.table != self.table {
            violations.push(Violation::new(
                "$table",
                ViolationReason::InvalidEnvelope(format!(
                    "record of table {} in {} file",
                    archived.table, self.table
                )),
            ));
        }
        let key = match RecordKey::parse(&archived.key) {
            Ok(key) => Some(key),
            Err(_) => {
                violations.push(Violation::new("$key", ViolationReason::InvalidKey));
                None
            }
        };
        if archived.version == 0 {
            violations.push(Violation::new(
                "$version",
                ViolationReason::InvalidEnvelope("version must be at least 1".into()),
            ));
        } else if archived.version > MAX_VERSION {
            violations.push(Violation::new(
                "$version",
                ViolationReason::InvalidEnvelope(format!(
                    "version {} exceeds the maximum of {MAX_VERSION}",
                    archived.version
                )),
            ));
        }
        if let Some(synced) = archived.synced_version {
            if synced > MAX_VERSION {
                violations.push(Violation::new(
                    "$synced_version",
                    ViolationReason::InvalidEnvelope(format!(
                        "synced version {synced} exceeds the maximum of {MAX_VERSION}"
                    )),
                ));
            } else if synced > archived.version {
                violations.push(Violation::new(
                    "$synced_version",
                    ViolationReason::InvalidEnvelope(format!(
                        "synced version {synced} is ahead of version {}",
                        archived.version
                    )),
                ));
            }
        }

        let fields = self.collect_fields(&archived.fields, &mut violations);
        self.finish(key, fields, archived.origin, violations, Some(archived))
    }

    fn finish(
        &self,
        key: Option<RecordKey>,
        fields: Fields,
        origin: Origin,
        violations: Vec<Violation>,
        archived: Option<&ArchivedRecord>,
    ) -> Result<ValidatedRecord, ValidationError> {
        match key {
            Some(key) if violations.is_empty() => {
                let record = match archived {
                    Some(a) => LogicalRecord {
                        table: self.table,
                        key,
                        version: a.version,
                        fields,
                        origin,
                        updated_at: a.updated_at,
                        synced_version: a.synced_version,
                    },
                    None => LogicalRecord {
                        table: self.table,
                        key,
                        version: 0,
                        fields,
                        origin,
                        updated_at: Utc::now(),
                        synced_version: None,
                    },
                };
                Ok(ValidatedRecord::new(record))
            }
            key => Err(ValidationError {
                table: self.table,
                key: key
                    .map(|k| k.as_str().to_string())
                    .or_else(|| archived.map(|a| a.key.clone())),
                violations,
            }),
        }
    }

    fn collect_fields(&self, payload: &Value, violations: &mut Vec<Violation>) -> Fields {
        let mut fields = Fields::new();
        let Some(obj) = payload.as_object() else {
            violations.push(Violation::new(
                "$root",
                ViolationReason::TypeMismatch {
                    expected: "map".into(),
                    found: json_type_name(payload),
                },
            ));
            return fields;
        };

        for name in obj.keys() {
            if self.field(name).is_none() {
                violations.push(Violation::new(name, ViolationReason::UnknownField));
            }
        }

        for spec in &self.fields {
            match obj.get(&spec.name).filter(|v| !v.is_null()) {
                None => {
                    if spec.required {
                        violations.push(Violation::new(&spec.name, ViolationReason::Missing));
                    }
                }
                Some(raw) => {
                    let Some(value) = convert(raw, &spec.field_type, &spec.name, violations) else {
                        continue;
                    };
                    if let Some(value) = apply_constraints(spec, value, violations) {
                        fields.insert(spec.name.clone(), value);
                    }
                }
            }
        }

        check_derived(self, &mut fields, violations);
        fields
    }
}

fn mismatch(path: &str, expected: &FieldType, raw: &Value, violations: &mut Vec<Violation>) {
    violations.push(Violation::new(
        path,
        ViolationReason::TypeMismatch {
            expected: expected.describe(),
            found: json_type_name(raw),
        },
    ));
}

/// Typed conversion. Records a violation and returns `None` on mismatch;
/// nested values report every bad element.
fn convert(
    raw: &Value,
    field_type: &FieldType,
    path: &str,
    violations: &mut Vec<Violation>,
) -> Option<FieldValue> {
    match (field_type, raw) {
        (FieldType::Text, Value::String(s)) => Some(FieldValue::Text(s.trim().to_string())),
        (FieldType::Integer, Value::Number(n)) if n.is_i64() => n.as_i64().map(FieldValue::Integer),
        (FieldType::Integer, Value::Number(n)) if n.is_u64() => {
            violations.push(Violation::new(
                path,
                ViolationReason::OutOfRange {
                    min: i64::MIN,
                    max: i64::MAX,
                    actual: n.as_f64().unwrap_or(f64::INFINITY),
                },
            ));
            None
        }
        (FieldType::Float, Value::Number(n)) => n.as_f64().map(FieldValue::Float),
        (FieldType::Boolean, Value::Bool(b)) => Some(FieldValue::Boolean(*b)),
        (FieldType::List(inner), Value::Array(items)) => {
            let before = violations.len();
            let converted: Vec<FieldValue> = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| convert(item, inner, &format!("{path}[{i}]"), violations))
                .collect();
            (violations.len() == before).then_some(FieldValue::List(converted))
        }
        (FieldType::Map(inner), Value::Object(map)) => {
            let before = violations.len();
            let converted: BTreeMap<String, FieldValue> = map
                .iter()
                .filter_map(|(k, v)| {
                    convert(v, inner, &format!("{path}.{k}"), violations).map(|v| (k.clone(), v))
                })
                .collect();
            (violations.len() == before).then_some(FieldValue::Map(converted))
        }
        (FieldType::Any, raw) => convert_any(raw, path, violations),
        (expected, raw) => {
            mismatch(path, expected, raw, violations);
            None
        }
    }
}

fn convert_any(raw: &Value, path: &str, violations: &mut Vec<Violation>) -> Option<FieldValue> {
    match raw {
        Value::Null => {
            mismatch(path, &FieldType::Any, raw, violations);
            None
        }
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(FieldValue::Integer(i)),
            None => n.as_f64().map(FieldValue::Float),
        },
        Value::String(s) => Some(FieldValue::Text(s.trim().to_string())),
        Value::Array(_) => convert(raw, &FieldType::list_of(FieldType::Any), path, violations),
        Value::Object(_) => convert(raw, &FieldType::map_of(FieldType::Any), path, violations),
    }
}

fn numeric(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Integer(n) => Some(*n as f64),
        FieldValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn in_range(actual: f64, min: i64, max: i64) -> bool {
    actual >= min as f64 && (max == i64::MAX || actual <= max as f64)
}

fn canonical<'a>(allowed: &'a [String], found: &str) -> Option<&'a String> {
    allowed.iter().find(|a| a.eq_ignore_ascii_case(found))
}

/// Single-field constraints. Cross-field ones run in [`check_derived`].
fn apply_constraints(
    spec: &FieldSpec,
    mut value: FieldValue,
    violations: &mut Vec<Violation>,
) -> Option<FieldValue> {
    let before = violations.len();
    for constraint in &spec.constraints {
        match constraint {
            Constraint::Range { min, max } => {
                if let Some(actual) = numeric(&value) {
                    if !in_range(actual, *min, *max) {
                        violations.push(Violation::new(
                            &spec.name,
                            ViolationReason::OutOfRange {
                                min: *min,
                                max: *max,
                                actual,
                            },
                        ));
                    }
                }
            }
            Constraint::OneOf(allowed) => {
                if let FieldValue::Text(found) = &value {
                    match canonical(allowed, found) {
                        Some(spelling) => value = FieldValue::Text(spelling.clone()),
                        None => violations.push(Violation::new(
                            &spec.name,
                            ViolationReason::NotOneOf {
                                allowed: allowed.clone(),
                                found: found.clone(),
                            },
                        )),
                    }
                }
            }
            Constraint::NonEmpty => {
                if value.as_text().is_some_and(str::is_empty) {
                    violations.push(Violation::new(&spec.name, ViolationReason::Empty));
                }
            }
            Constraint::EachInRange { min, max } => {
                if let Some(map) = value.as_map() {
                    for (k, v) in map {
                        if let Some(actual) = numeric(v).filter(|a| !in_range(*a, *min, *max)) {
                            violations.push(Violation::new(
                                format!("{}.{k}", spec.name),
                                ViolationReason::OutOfRange {
                                    min: *min,
                                    max: *max,
                                    actual,
                                },
                            ));
                        }
                    }
                }
            }
            Constraint::KeysOneOf(allowed) => {
                if let FieldValue::Map(map) = &value {
                    let mut normalized = BTreeMap::new();
                    for (k, v) in map {
                        match canonical(allowed, k) {
                            Some(spelling) if normalized.contains_key(spelling) => {
                                violations.push(Violation::new(
                                    format!("{}.{k}", spec.name),
                                    ViolationReason::DuplicateKey {
                                        canonical: spelling.clone(),
                                    },
                                ));
                            }
                            Some(spelling) => {
                                normalized.insert(spelling.clone(), v.clone());
                            }
                            None => violations.push(Violation::new(
                                format!("{}.{k}", spec.name),
                                ViolationReason::NotOneOf {
                                    allowed: allowed.clone(),
                                    found: k.clone(),
                                },
                            )),
                        }
                    }
                    value = FieldValue::Map(normalized);
                }
            }
            Constraint::ModifierOf(_) => {}
        }
    }
    (violations.len() == before).then_some(value)
}

/// Parse an ability modifier written as `(+2)`, `+2`, `(-1)` or `0`.
pub fn parse_modifier(text: &str) -> Option<i64> {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')').trim();
    let digits = inner.strip_prefix('+').unwrap_or(inner);
    digits.parse().ok()
}

/// Modifier for an ability score: `floor((score - 10) / 2)`.
pub fn ability_modifier(score: i64) -> i64 {
    (score - 10).div_euclid(2)
}

pub fn format_modifier(modifier: i64) -> String {
    format!("({modifier:+})")
}

/// Cross-field checks. A modifier whose score is absent or invalid is only
/// checked for shape.
fn check_derived(
    schema: &Schema,
    fields: &mut Fields,
    violations: &mut Vec<Violation>,
) {
    for spec in &schema.fields {
        for constraint in &spec.constraints {
            let Constraint::ModifierOf(score_field) = constraint else {
                continue;
            };
            let Some(FieldValue::Text(found)) = fields.get(&spec.name) else {
                continue;
            };
            let found = found.clone();
            let score = fields.get(score_field).and_then(FieldValue::as_integer);
            match (parse_modifier(&found), score) {
                (None, _) => {
                    fields.remove(&spec.name);
                    violations.push(Violation::new(
                        &spec.name,
                        ViolationReason::DerivedMismatch {
                            expected: "a modifier like (+2)".into(),
                            found,
                        },
                    ));
                }
                (Some(modifier), Some(score)) if modifier != ability_modifier(score) => {
                    fields.remove(&spec.name);
                    violations.push(Violation::new(
                        &spec.name,
                        ViolationReason::DerivedMismatch {
                            expected: format_modifier(ability_modifier(score)),
                            found,
                        },
                    ));
                }
                (Some(modifier), _) => {
                    fields.insert(spec.name.clone(), FieldValue::Text(format_modifier(modifier)));
                }
            }
        }
    }
}
