//! Hand-curated duplicate-id table consumed by the identity resolver.
//!
//! The table is versioned TOML (`config/overrides.toml` is compiled in as the
//! default) so it can be reviewed and tested apart from the resolver:
//!
//! ```toml
//! version = 1
//!
//! [overrides]
//! "652065" = "147939"  # Al Jadani -> Al-Jadani
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::identity::normalize_athlete_id;

pub const OVERRIDES_VERSION: u32 = 1;

const DEFAULT_TABLE: &str = include_str!("../config/overrides.toml");

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("Failed to read override table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid override table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unsupported override table version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Override entry has an empty id: {from:?} -> {to:?}")]
    EmptyId { from: String, to: String },

    #[error("Override maps id {0} to itself")]
    SelfMapping(String),

    #[error("Override id {id} is mapped twice: to {first} and {second}")]
    Conflict {
        id: String,
        first: String,
        second: String,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OverrideFile {
    version: u32,
    #[serde(default)]
    overrides: BTreeMap<String, String>,
}

/// Variant id -> canonical id. Ids are stored normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualOverrides {
    entries: BTreeMap<String, String>,
}

impl ManualOverrides {
    pub fn builder() -> OverridesBuilder {
        OverridesBuilder::default()
    }

    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self, OverrideError> {
        Self::from_toml(DEFAULT_TABLE)
    }

    pub fn load(path: &Path) -> Result<Self, OverrideError> {
        let content = fs::read_to_string(path).map_err(|source| OverrideError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, OverrideError> {
        let file: OverrideFile = toml::from_str(content)?;
        if file.version != OVERRIDES_VERSION {
            return Err(OverrideError::Version {
                found: file.version,
                expected: OVERRIDES_VERSION,
            });
        }
        let mut builder = Self::builder();
        for (from, to) in &file.overrides {
            builder = builder.map(from, to);
        }
        builder.build()
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn is_source(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted copy of the table, stored in the identity cache to detect edits.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Default)]
pub struct OverridesBuilder {
    pending: Vec<(String, String)>,
}

impl OverridesBuilder {
    pub fn map(mut self, from: &str, to: &str) -> Self {
        self.pending.push((from.to_string(), to.to_string()));
        self
    }

    pub fn build(self) -> Result<ManualOverrides, OverrideError> {
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        for (from_raw, to_raw) in self.pending {
            let from = normalize_athlete_id(&from_raw);
            let to = normalize_athlete_id(&to_raw);
            if from.is_empty() || to.is_empty() {
                return Err(OverrideError::EmptyId {
                    from: from_raw,
                    to: to_raw,
                });
            }
            if from == to {
                return Err(OverrideError::SelfMapping(from));
            }
            if let Some(existing) = entries.get(&from) {
                if existing != &to {
                    return Err(OverrideError::Conflict {
                        id: from,
                        first: existing.clone(),
                        second: to,
                    });
                }
            }
            entries.insert(from, to);
        }
        Ok(ManualOverrides { entries })
    }
}
