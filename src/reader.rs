use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, info};

use crate::config::{DELIMITER, READ_BUFFER_CAPACITY};
use crate::error::{PipelineError, Result};
use crate::models::{Batch, RawRecord, CANONICAL_COLUMNS};

/// Raw results export, one row per performance.
pub const EXPORT_COLUMNS: &[&str] = &[
    "athleteid",
    "firstname",
    "lastname",
    "nationality",
    "gender",
    "dob",
    "eventname",
    "performance",
    "wind",
    "round",
    "position",
    "competitionid",
    "competitionname",
    "competitiondate",
    "wapoints",
    "pb",
    "sb",
];

/// The accepted header layouts. Columns are matched as a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSchema {
    Export,
    Canonical,
}

impl SourceSchema {
    pub const ALL: [SourceSchema; 2] = [SourceSchema::Export, SourceSchema::Canonical];

    pub fn name(self) -> &'static str {
        match self {
            SourceSchema::Export => "export-v1",
            SourceSchema::Canonical => "canonical-v1",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            SourceSchema::Export => EXPORT_COLUMNS,
            SourceSchema::Canonical => CANONICAL_COLUMNS,
        }
    }

    /// Picks the schema whose column set equals the header. On mismatch the
    /// error is reported against the closest schema.
    pub fn detect(headers: &StringRecord) -> Result<Self> {
        let seen: Vec<&str> = headers.iter().map(|h| h.trim()).collect();
        let seen_set: BTreeSet<&str> = seen.iter().copied().collect();
        let duplicated = seen_set.len() != seen.len();

        let mut closest = SourceSchema::Export;
        let mut closest_overlap = 0;
        for schema in Self::ALL {
            let expected: BTreeSet<&str> = schema.columns().iter().copied().collect();
            if expected == seen_set && !duplicated {
                return Ok(schema);
            }
            let overlap = expected.intersection(&seen_set).count();
            if overlap > closest_overlap {
                closest = schema;
                closest_overlap = overlap;
            }
        }

        let expected: BTreeSet<&str> = closest.columns().iter().copied().collect();
        let missing = expected
            .difference(&seen_set)
            .map(|c| c.to_string())
            .collect();
        let mut unexpected: Vec<String> = seen_set
            .difference(&expected)
            .map(|c| c.to_string())
            .collect();
        if duplicated {
            let mut counted = BTreeSet::new();
            for column in &seen {
                if !counted.insert(*column) && !unexpected.iter().any(|u| u == column) {
                    unexpected.push(format!("{} (duplicate)", column));
                }
            }
        }

        Err(PipelineError::SourceFormat {
            expected: closest.name().to_string(),
            missing,
            unexpected,
        })
    }
}

/// Splits a delimited source into batches of at most `batch_size` rows.
///
/// The header is validated when the reader is opened, so a malformed source
/// fails before a single batch is produced.
pub struct ChunkedReader<R: Read> {
    reader: csv::Reader<R>,
    schema: SourceSchema,
    headers: StringRecord,
    batch_size: usize,
    next_row: u64,
    next_index: u64,
    done: bool,
}

impl ChunkedReader<File> {
    pub fn from_path(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        info!(path = ?path, batch_size, "Opening source");
        Self::from_reader(file, batch_size)
    }
}

impl<R: Read> ChunkedReader<R> {
    pub fn from_reader(source: R, batch_size: usize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .flexible(true)
            .has_headers(true)
            .buffer_capacity(READ_BUFFER_CAPACITY)
            .from_reader(source);

        let mut headers = reader.headers()?.clone();
        // Excel exports carry a BOM on the first column name
        if let Some(first) = headers.get(0) {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                let mut cleaned = StringRecord::new();
                cleaned.push_field(stripped);
                headers.iter().skip(1).for_each(|h| cleaned.push_field(h));
                headers = cleaned;
            }
        }
        headers.trim();

        let schema = SourceSchema::detect(&headers)?;
        debug!(schema = schema.name(), columns = headers.len(), "Source header accepted");

        Ok(Self {
            reader,
            schema,
            headers,
            batch_size: batch_size.max(1),
            next_row: 1,
            next_index: 0,
            done: false,
        })
    }

    pub fn schema(&self) -> SourceSchema {
        self.schema
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    fn read_batch(&mut self) -> Result<Batch> {
        let mut records = Vec::with_capacity(self.batch_size.min(64 * 1024));
        let mut fields = StringRecord::new();
        while records.len() < self.batch_size {
            if !self.reader.read_record(&mut fields)? {
                self.done = true;
                break;
            }
            records.push(RawRecord {
                row: self.next_row,
                fields: fields.clone(),
            });
            self.next_row += 1;
        }
        let batch = Batch {
            index: self.next_index,
            records,
        };
        self.next_index += 1;
        Ok(batch)
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_batch() {
            Ok(batch) if batch.is_empty() => None,
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
