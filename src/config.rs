use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::EventKind;
use crate::partition::{PartitionFilter, PartitionSpec};
use crate::rules::Pattern;

/// Rows per batch (matches the chunk size the export was historically loaded with)
pub const DEFAULT_BATCH_SIZE: usize = 500_000;

/// Field delimiter of the results export and of every canonical output
pub const DELIMITER: u8 = b';';

/// Legal tailwind limit in m/s for wind-relevant events
pub const WIND_LIMIT: f64 = 2.0;

/// Bump when the on-disk identity index layout or resolution rules change
pub const CACHE_VERSION: u32 = 1;

/// Buffer sizes for reading the export and writing partitions
pub const READ_BUFFER_CAPACITY: usize = 256 * 1024;
pub const WRITE_BUFFER_CAPACITY: usize = 128 * 1024;

pub const STAGING_DIR: &str = ".staging";
pub const QUARANTINE_FILE: &str = "quarantine.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CACHE_FILE: &str = "identity.cache";

/// Competition ids of the championships used for benchmarks (2008-2024)
pub const MAJOR_CHAMPIONSHIP_IDS: &[&str] = &[
    // Olympic Games
    "13079218", "12992925", "12877460", "12825110", "12042259",
    // World Championships
    "13046619", "13002354", "12935526", "12898707", "12844203",
    // Asian Games
    "13048549", "12911586", "12854365",
];

pub const MAJOR_CHAMPIONSHIP_KEYWORDS: &[&str] =
    &["Olympic Games", "World Championships", "Asian Games"];

/// What happens to a row whose performance, round or event cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Abort the rebuild on the first row error; nothing is published
    Strict,
    /// Route the row to quarantine and continue
    Tolerant,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub policy: ErrorPolicy,
    pub wind_limit: f64,
    pub rounds: RoundConfig,
    pub classifier: ClassifierConfig,
    pub partitions: Vec<PartitionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundConfig {
    /// Labels that mean "no round recorded"; they normalize to Final
    pub none_tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Kind assigned to event names no rule matches. Unset means fail closed.
    pub catch_all: Option<EventKind>,
    /// Evaluated in order, before the built-in table
    pub rules: Vec<EventRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRuleConfig {
    pub pattern: String,
    #[serde(rename = "match")]
    pub match_type: MatchType,
    pub kind: EventKind,
    #[serde(default)]
    pub wind: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Prefix,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    pub name: String,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum FilterConfig {
    All,
    Major {
        #[serde(default)]
        competition_ids: Option<Vec<String>>,
        #[serde(default)]
        keywords: Option<Vec<String>>,
    },
    Nation {
        code: String,
    },
    SinceYear {
        year: i32,
    },
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            policy: ErrorPolicy::Strict,
            wind_limit: WIND_LIMIT,
            rounds: RoundConfig::default(),
            classifier: ClassifierConfig::default(),
            partitions: default_partitions(),
        }
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            none_tokens: vec!["none".to_string()],
        }
    }
}

fn default_partitions() -> Vec<PartitionConfig> {
    vec![
        PartitionConfig {
            name: "all".to_string(),
            filter: FilterConfig::All,
        },
        PartitionConfig {
            name: "major_championships".to_string(),
            filter: FilterConfig::Major {
                competition_ids: None,
                keywords: None,
            },
        },
        PartitionConfig {
            name: "ksa".to_string(),
            filter: FilterConfig::Nation {
                code: "KSA".to_string(),
            },
        },
        PartitionConfig {
            name: "recent".to_string(),
            filter: FilterConfig::SinceYear { year: 2020 },
        },
    ]
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        anyhow::ensure!(config.batch_size > 0, "batch_size must be at least 1");
        Ok(config)
    }

    /// The settings that decide whether a row is accepted, and therefore which
    /// rows feed the identity index. Part of the identity cache key.
    pub fn identity_settings(&self) -> Result<String> {
        serde_json::to_string(&(&self.rounds, &self.classifier))
            .context("Failed to serialize classification settings")
    }

    /// Resolves the configured partitions, restricted to `selected` when it is non-empty.
    pub fn partition_specs(&self, selected: &[String]) -> Result<Vec<PartitionSpec>> {
        for (i, p) in self.partitions.iter().enumerate() {
            if self.partitions[..i].iter().any(|q| q.name == p.name) {
                anyhow::bail!("Partition '{}' is configured more than once", p.name);
            }
        }
        for name in selected {
            if !self.partitions.iter().any(|p| &p.name == name) {
                anyhow::bail!(
                    "Unknown partition '{}' (configured: {})",
                    name,
                    self.partitions
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }

        self.partitions
            .iter()
            .filter(|p| selected.is_empty() || selected.contains(&p.name))
            .map(|p| PartitionSpec::new(&p.name, p.filter.to_filter()))
            .collect()
    }
}

impl FilterConfig {
    fn to_filter(&self) -> PartitionFilter {
        match self {
            FilterConfig::All => PartitionFilter::All,
            FilterConfig::Major {
                competition_ids,
                keywords,
            } => PartitionFilter::Major {
                competition_ids: competition_ids.clone().unwrap_or_else(|| {
                    MAJOR_CHAMPIONSHIP_IDS.iter().map(|s| s.to_string()).collect()
                }),
                keywords: keywords
                    .clone()
                    .unwrap_or_else(|| {
                        MAJOR_CHAMPIONSHIP_KEYWORDS
                            .iter()
                            .map(|s| s.to_string())
                            .collect()
                    })
                    .into_iter()
                    .map(|k| k.to_lowercase())
                    .collect(),
            },
            FilterConfig::Nation { code } => PartitionFilter::Nation(code.trim().to_uppercase()),
            FilterConfig::SinceYear { year } => PartitionFilter::SinceYear(*year),
        }
    }
}

impl EventRuleConfig {
    pub fn pattern(&self) -> Result<Pattern> {
        Pattern::from_config(self.match_type, &self.pattern)
    }
}
