//! Scramble options and file-based configuration

use crate::{Result, ScrambleDbError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Option key: name of the added tier column.
pub const TIER_COLUMN_NAME: &str = "tier_column_name";
/// Option key: name of the added block column.
pub const BLOCK_COLUMN_NAME: &str = "block_column_name";
/// Option key: suffix appended to the original table name when no target
/// table name is given.
pub const SCRAMBLE_TABLE_SUFFIX: &str = "scramble_table_suffix";
/// Option key: target row count per block, parsed as a float and truncated.
pub const SCRAMBLE_BLOCK_SIZE: &str = "scramble_block_size";

/// Maps the camelCase spellings used by existing deployments onto the
/// canonical keys, so either spelling reaches the same setting.
fn canonical_key(key: &str) -> &str {
    match key {
        "tierColumnName" => TIER_COLUMN_NAME,
        "blockColumnName" => BLOCK_COLUMN_NAME,
        "scrambleTableSuffix" => SCRAMBLE_TABLE_SUFFIX,
        "scrambleTableBlockSize" => SCRAMBLE_BLOCK_SIZE,
        other => other,
    }
}

const DEFAULT_TIER_COLUMN: &str = "verdictdbtier";
const DEFAULT_BLOCK_COLUMN: &str = "verdictdbblock";
const DEFAULT_TABLE_SUFFIX: &str = "_scrambled";
const DEFAULT_BLOCK_SIZE: &str = "1e6";

/// Named scramble settings with documented defaults.
///
/// Caller-supplied overrides replace defaults key-by-key: a key present in
/// the override always wins for that key, all others keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrambleOptions {
    settings: HashMap<String, String>,
}

impl Default for ScrambleOptions {
    fn default() -> Self {
        let mut settings = HashMap::new();
        settings.insert(TIER_COLUMN_NAME.to_string(), DEFAULT_TIER_COLUMN.to_string());
        settings.insert(BLOCK_COLUMN_NAME.to_string(), DEFAULT_BLOCK_COLUMN.to_string());
        settings.insert(SCRAMBLE_TABLE_SUFFIX.to_string(), DEFAULT_TABLE_SUFFIX.to_string());
        settings.insert(SCRAMBLE_BLOCK_SIZE.to_string(), DEFAULT_BLOCK_SIZE.to_string());
        Self { settings }
    }
}

impl ScrambleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(canonical_key(key)).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.settings
            .insert(canonical_key(&key).to_string(), value.into());
    }

    /// Returns a copy with `overrides` applied on top of these settings.
    pub fn merged(&self, overrides: &HashMap<String, String>) -> Self {
        let mut settings = self.settings.clone();
        for (k, v) in overrides {
            settings.insert(canonical_key(k).to_string(), v.clone());
        }
        Self { settings }
    }

    pub fn tier_column_name(&self) -> &str {
        self.get(TIER_COLUMN_NAME).unwrap_or(DEFAULT_TIER_COLUMN)
    }

    pub fn block_column_name(&self) -> &str {
        self.get(BLOCK_COLUMN_NAME).unwrap_or(DEFAULT_BLOCK_COLUMN)
    }

    pub fn scramble_table_suffix(&self) -> &str {
        self.get(SCRAMBLE_TABLE_SUFFIX).unwrap_or(DEFAULT_TABLE_SUFFIX)
    }

    /// Target rows per block. The setting is parsed as a float (so "1e6" is
    /// accepted) and truncated, not rounded, to an integer.
    pub fn block_size(&self) -> Result<u64> {
        let raw = self.get(SCRAMBLE_BLOCK_SIZE).unwrap_or(DEFAULT_BLOCK_SIZE);
        let parsed: f64 = raw.parse().map_err(|_| {
            ScrambleDbError::Configuration(format!("malformed block size option: {raw}"))
        })?;
        if !parsed.is_finite() || parsed < 1.0 {
            return Err(ScrambleDbError::Configuration(format!(
                "block size must be a positive number, got: {raw}"
            )));
        }
        Ok(parsed.trunc() as u64)
    }
}

/// File-loadable coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrambleDbConfig {
    /// Schema where scrambled tables are created (defaults to the source's).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scramble_schema: Option<String>,

    /// Schema for intermediate materializations (required by FastConverge).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratchpad_schema: Option<String>,

    /// Override for the default block size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u64>,
}

impl ScrambleDbConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
