use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

/// Logical table a record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Character,
    CampaignEntity,
    Creature,
    Spell,
    Item,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Character,
        Table::CampaignEntity,
        Table::Creature,
        Table::Spell,
        Table::Item,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::CampaignEntity => "campaign_entity",
            Self::Creature => "creature",
            Self::Spell => "spell",
            Self::Item => "item",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "character" => Ok(Self::Character),
            "campaign_entity" => Ok(Self::CampaignEntity),
            "creature" => Ok(Self::Creature),
            "spell" => Ok(Self::Spell),
            "item" => Ok(Self::Item),
            _ => Err(CoreError::UnknownTable(s.to_string())),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    ReferenceDataset,
    Generated,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::ReferenceDataset => "reference_dataset",
            Self::Generated => "generated",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "user" => Ok(Self::User),
            "reference_dataset" => Ok(Self::ReferenceDataset),
            "generated" => Ok(Self::Generated),
            _ => Err(CoreError::UnknownOrigin(s.to_string())),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a record, unique within its table.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Opaque key for a user-created record.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Derive the key of a reference or generated record from its name.
    ///
    /// Lowercases, keeps ASCII alphanumerics and collapses every other run of
    /// characters into a single `-`. Returns `None` when nothing is left.
    pub fn from_name(name: &str) -> Option<Self> {
        let mut key = String::with_capacity(name.len());
        let mut pending_dash = false;
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !key.is_empty() {
                    key.push('-');
                }
                pending_dash = false;
                key.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    /// Wrap a key that was assigned elsewhere (archives, callers).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(CoreError::InvalidData("empty record key".into()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_roundtrip() {
        for table in Table::ALL {
            assert_eq!(Table::parse(table.as_str()).unwrap(), table);
        }
        assert!(matches!(
            Table::parse("monster"),
            Err(CoreError::UnknownTable(name)) if name == "monster"
        ));
    }

    #[test]
    fn key_from_name_normalizes() {
        let key = RecordKey::from_name("  Adult Red Dragon ").unwrap();
        assert_eq!(key.as_str(), "adult-red-dragon");
        let key = RecordKey::from_name("Tasha's Hideous Laughter").unwrap();
        assert_eq!(key.as_str(), "tasha-s-hideous-laughter");
        assert_eq!(
            RecordKey::from_name("OWLBEAR"),
            RecordKey::from_name("owlbear")
        );
    }

    #[test]
    fn key_from_symbols_only_is_none() {
        assert!(RecordKey::from_name(" -- ").is_none());
        assert!(RecordKey::from_name("").is_none());
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(RecordKey::generate(), RecordKey::generate());
    }
}
