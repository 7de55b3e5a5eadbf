use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tunables for export and restore.
///
/// Every field has a default, so a config file only names what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// File-name prefix of exported archives.
    pub archive_prefix: String,
    /// Archives larger than this are refused before unpacking.
    pub max_archive_bytes: u64,
    /// Pretty-print table files inside archives.
    pub pretty_tables: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            archive_prefix: "lorekeep_export".to_string(),
            max_archive_bytes: 64 * 1024 * 1024,
            pretty_tables: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
        serde_json::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
