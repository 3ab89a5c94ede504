use anyhow::{bail, Result};

use crate::config::QUARANTINE_FILE;
use crate::models::CanonicalRecord;

/// Membership predicate of a partition. Predicates are independent: one
/// record may land in any number of partitions.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionFilter {
    All,
    /// Competition id listed, or competition name containing a keyword.
    /// Keywords are stored lower-cased.
    Major {
        competition_ids: Vec<String>,
        keywords: Vec<String>,
    },
    Nation(String),
    SinceYear(i32),
}

impl PartitionFilter {
    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        match self {
            PartitionFilter::All => true,
            PartitionFilter::Major {
                competition_ids,
                keywords,
            } => {
                if competition_ids.iter().any(|id| id == &record.competition_id) {
                    return true;
                }
                let name = record.competition_name.to_lowercase();
                keywords.iter().any(|k| name.contains(k.as_str()))
            }
            PartitionFilter::Nation(code) => &record.country_code == code,
            PartitionFilter::SinceYear(year) => record.year >= *year,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionSpec {
    name: String,
    filter: PartitionFilter,
}

impl PartitionSpec {
    /// The name becomes a file name, so it is restricted to `[A-Za-z0-9_-]`.
    pub fn new(name: &str, filter: PartitionFilter) -> Result<Self> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!(
                "Invalid partition name '{}': use letters, digits, '_' or '-'",
                name
            );
        }
        if format!("{}.csv", name) == QUARANTINE_FILE {
            bail!("Partition name '{}' is reserved", name);
        }
        Ok(Self {
            name: name.to_string(),
            filter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &PartitionFilter {
        &self.filter
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name)
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        self.filter.matches(record)
    }
}
