//! Staged, all-or-nothing publication of partitions.
//!
//! Every output file is first written under `<output>/.staging/`. Nothing in
//! the output directory changes until [`StagedOutput::commit`], which renames
//! each staged file over its target. Dropping an uncommitted `StagedOutput`
//! (fatal error, cancellation, panic unwinding) deletes the staging directory
//! and leaves the previously published files untouched.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DELIMITER, QUARANTINE_FILE, STAGING_DIR, SUMMARY_FILE, WRITE_BUFFER_CAPACITY};
use crate::error::RowError;
use crate::models::{CanonicalRecord, CANONICAL_COLUMNS};
use crate::partition::PartitionSpec;

pub const QUARANTINE_COLUMNS: &[&str] = &["row", "kind", "column", "value", "message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The new rows become the whole partition
    Replace,
    /// The new rows are added after the rows already published
    Append,
}

type CsvSink = csv::Writer<BufWriter<File>>;

fn csv_sink(file: File) -> CsvSink {
    csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file))
}

fn create_sink(path: &Path) -> Result<CsvSink> {
    let file =
        File::create(path).with_context(|| format!("Failed to create staged file: {:?}", path))?;
    Ok(csv_sink(file))
}

/// Fails unless the published partition uses the canonical header.
fn check_existing_header(path: &Path) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open existing partition: {:?}", path))?;
    let mut header = csv::StringRecord::new();
    if !reader.read_record(&mut header)? {
        bail!("Existing partition {:?} is empty", path);
    }
    if header.iter().ne(CANONICAL_COLUMNS.iter().copied()) {
        bail!(
            "Existing partition {:?} has a different header; rebuild it without --append",
            path
        );
    }
    Ok(())
}

struct PartitionSink {
    spec: PartitionSpec,
    staged: PathBuf,
    target: PathBuf,
    writer: CsvSink,
    rows: u64,
}

impl PartitionSink {
    fn open(spec: PartitionSpec, output_dir: &Path, staging_dir: &Path, mode: WriteMode) -> Result<Self> {
        let target = output_dir.join(spec.file_name());
        let staged = staging_dir.join(spec.file_name());

        let writer = if mode == WriteMode::Append && target.exists() {
            check_existing_header(&target)?;
            fs::copy(&target, &staged)
                .with_context(|| format!("Failed to stage existing partition: {:?}", target))?;
            let file = OpenOptions::new()
                .append(true)
                .open(&staged)
                .with_context(|| format!("Failed to open staged file: {:?}", staged))?;
            debug!(partition = spec.name(), "Appending to existing partition");
            csv_sink(file)
        } else {
            let mut writer = create_sink(&staged)?;
            writer.write_record(CANONICAL_COLUMNS)?;
            writer
        };

        Ok(Self {
            spec,
            staged,
            target,
            writer,
            rows: 0,
        })
    }

    fn write_matching(&mut self, records: &[CanonicalRecord]) -> Result<()> {
        for record in records.iter().filter(|r| self.spec.matches(r)) {
            self.writer
                .serialize(record)
                .with_context(|| format!("Failed to write partition '{}'", self.spec.name()))?;
            self.rows += 1;
        }
        Ok(())
    }
}

pub struct StagedOutput {
    output_dir: PathBuf,
    staging_dir: PathBuf,
    partitions: Vec<PartitionSink>,
    quarantine: CsvSink,
    quarantined: u64,
    committed: bool,
}

impl StagedOutput {
    pub fn create(output_dir: &Path, specs: Vec<PartitionSpec>, mode: WriteMode) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

        let staging_dir = output_dir.join(STAGING_DIR);
        if staging_dir.exists() {
            warn!(path = ?staging_dir, "Removing leftover staging directory");
            fs::remove_dir_all(&staging_dir)
                .with_context(|| format!("Failed to clear staging directory: {:?}", staging_dir))?;
        }
        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("Failed to create staging directory: {:?}", staging_dir))?;

        let mut output = Self {
            output_dir: output_dir.to_path_buf(),
            quarantine: create_sink(&staging_dir.join(QUARANTINE_FILE))?,
            staging_dir,
            partitions: Vec::with_capacity(specs.len()),
            quarantined: 0,
            committed: false,
        };
        output.quarantine.write_record(QUARANTINE_COLUMNS)?;

        // `output` already owns the staging dir, so a failure here cleans it up
        for spec in specs {
            let sink = PartitionSink::open(spec, &output.output_dir, &output.staging_dir, mode)?;
            output.partitions.push(sink);
        }

        info!(
            partitions = output.partitions.len(),
            mode = ?mode,
            path = ?output.staging_dir,
            "Staging output"
        );
        Ok(output)
    }

    /// Partitions are written in parallel; each one keeps source order.
    pub fn write_batch(&mut self, records: &[CanonicalRecord]) -> Result<()> {
        self.partitions
            .par_iter_mut()
            .try_for_each(|sink| sink.write_matching(records))
    }

    pub fn quarantine(&mut self, errors: &[RowError]) -> Result<()> {
        for e in errors {
            self.quarantine.write_record([
                e.row.to_string().as_str(),
                e.kind.as_str(),
                e.column.as_str(),
                e.value.as_str(),
                e.message.as_str(),
            ])?;
            self.quarantined += 1;
        }
        Ok(())
    }

    /// Rows written so far in this run, per partition.
    pub fn partition_counts(&self) -> BTreeMap<String, u64> {
        self.partitions
            .iter()
            .map(|p| (p.spec.name().to_string(), p.rows))
            .collect()
    }

    pub fn quarantined(&self) -> u64 {
        self.quarantined
    }

    /// Flushes every staged file and writes the summary, returning the
    /// `(staged, target)` pairs in publication order: partitions, then the
    /// quarantine file, then `summary.json`.
    fn stage_for_publish<S: Serialize>(&mut self, summary: &S) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut staged = Vec::with_capacity(self.partitions.len() + 2);
        for mut sink in self.partitions.drain(..) {
            sink.writer
                .flush()
                .with_context(|| format!("Failed to flush partition '{}'", sink.spec.name()))?;
            staged.push((sink.staged, sink.target));
        }
        self.quarantine.flush().context("Failed to flush quarantine")?;
        staged.push((
            self.staging_dir.join(QUARANTINE_FILE),
            self.output_dir.join(QUARANTINE_FILE),
        ));

        let summary_path = self.staging_dir.join(SUMMARY_FILE);
        let mut summary_file = BufWriter::new(
            File::create(&summary_path)
                .with_context(|| format!("Failed to create summary: {:?}", summary_path))?,
        );
        serde_json::to_writer_pretty(&mut summary_file, summary).context("Failed to write summary")?;
        summary_file.write_all(b"\n")?;
        summary_file.flush()?;
        staged.push((summary_path, self.output_dir.join(SUMMARY_FILE)));
        Ok(staged)
    }

    /// Renames each staged file over its target.
    ///
    /// `summary.json` is the commit marker. The previous one is removed before
    /// any data file is replaced and the new one is renamed last, so a
    /// published summary always describes the data files next to it. If a
    /// rename fails partway, the output directory is left without a summary.
    pub fn commit<S: Serialize>(mut self, summary: &S) -> Result<()> {
        let staged = self.stage_for_publish(summary)?;

        let marker = self.output_dir.join(SUMMARY_FILE);
        if marker.exists() {
            fs::remove_file(&marker)
                .with_context(|| format!("Failed to retire previous summary: {:?}", marker))?;
        }

        for (from, to) in &staged {
            fs::rename(from, to)
                .with_context(|| format!("Failed to publish {:?} to {:?}", from, to))?;
            debug!(path = ?to, "Published");
        }
        self.committed = true;

        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            warn!(error = %e, "Failed to remove staging directory");
        }
        info!(files = staged.len(), path = ?self.output_dir, "Output committed");
        Ok(())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close handles before deleting the files they point at
        self.partitions.clear();
        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => info!("Discarded staged output; published files are unchanged"),
            Err(e) => warn!(error = %e, path = ?self.staging_dir, "Failed to discard staged output"),
        }
    }
}
