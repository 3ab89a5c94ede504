//! Error taxonomy for the canonicalization pipeline.
//!
//! [`PipelineError`] stops a run before anything is published. [`RowError`] is
//! scoped to one source row and is either fatal or quarantined depending on
//! the configured [`ErrorPolicy`](crate::config::ErrorPolicy).

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source header does not match {expected}: missing [{}], unexpected [{}]", .missing.join(", "), .unexpected.join(", "))]
    SourceFormat {
        expected: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Row {row}: missing column '{column}'")]
    MissingColumn { row: u64, column: String },

    #[error("Row {}, column '{}': {}", .0.row, .0.column, .0)]
    Row(RowError),

    #[error("Rebuild cancelled")]
    Cancelled,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    PerformanceParse,
    RoundParse,
    UnknownEvent,
    InvalidField,
    UnresolvableIdentity,
}

impl RowErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RowErrorKind::PerformanceParse => "performance_parse",
            RowErrorKind::RoundParse => "round_parse",
            RowErrorKind::UnknownEvent => "unknown_event",
            RowErrorKind::InvalidField => "invalid_field",
            RowErrorKind::UnresolvableIdentity => "unresolvable_identity",
        }
    }

    /// Unresolvable identities are quarantined under every policy.
    pub fn always_quarantined(self) -> bool {
        matches!(self, RowErrorKind::UnresolvableIdentity)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?}: {message} (value: {value:?})")]
pub struct RowError {
    pub row: u64,
    pub kind: RowErrorKind,
    pub column: String,
    pub value: String,
    pub message: String,
}

impl RowError {
    pub fn new(kind: RowErrorKind, column: &str, value: &str, message: impl Into<String>) -> Self {
        Self {
            row: 0,
            kind,
            column: column.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    pub fn at_row(mut self, row: u64) -> Self {
        self.row = row;
        self
    }
}

/// Stage-level failure: either the row is bad, or the source itself is.
#[derive(Debug)]
pub enum RecordFailure {
    Row(RowError),
    Fatal(PipelineError),
}

impl From<RowError> for RecordFailure {
    fn from(e: RowError) -> Self {
        RecordFailure::Row(e)
    }
}

impl From<PipelineError> for RecordFailure {
    fn from(e: PipelineError) -> Self {
        RecordFailure::Fatal(e)
    }
}
