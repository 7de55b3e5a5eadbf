use std::collections::BTreeSet;

use lorekeep_core::{FieldValue, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<FieldValue>,
    pub after: Option<FieldValue>,
}

impl FieldChange {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        }
    }
}

/// Field-level difference between a stored record and an incoming one,
/// ordered by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordDiff {
    pub changes: Vec<FieldChange>,
}

impl RecordDiff {
    /// `current` is `None` when the record does not exist yet, in which case
    /// every incoming field shows as added.
    pub fn between(current: Option<&Fields>, incoming: &Fields) -> Self {
        let empty = Fields::new();
        let current = current.unwrap_or(&empty);
        let names: BTreeSet<&String> = current.keys().chain(incoming.keys()).collect();

        let changes = names
            .into_iter()
            .filter_map(|name| {
                let before = current.get(name);
                let after = incoming.get(name);
                (before != after).then(|| FieldChange {
                    field: name.clone(),
                    before: before.cloned(),
                    after: after.cloned(),
                })
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.field.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn diff_reports_added_removed_and_modified() {
        let current = fields(&[
            ("name", FieldValue::Text("Fireball".into())),
            ("level", FieldValue::Integer(3)),
            ("range", FieldValue::Text("150 feet".into())),
        ]);
        let incoming = fields(&[
            ("name", FieldValue::Text("Fireball".into())),
            ("level", FieldValue::Integer(4)),
            ("school", FieldValue::Text("Evocation".into())),
        ]);
        let diff = RecordDiff::between(Some(&current), &incoming);
        let kinds: Vec<(&str, ChangeKind)> = diff
            .changes
            .iter()
            .map(|c| (c.field.as_str(), c.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("level", ChangeKind::Modified),
                ("range", ChangeKind::Removed),
                ("school", ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn new_record_diff_adds_everything() {
        let incoming = fields(&[("name", FieldValue::Text("Rope".into()))]);
        let diff = RecordDiff::between(None, &incoming);
        assert_eq!(diff.changed_fields().collect::<Vec<_>>(), vec!["name"]);
        assert!(RecordDiff::between(Some(&incoming), &incoming).is_empty());
    }
}
