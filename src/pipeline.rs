//! The two passes of a rebuild.
//!
//! 1. **Indexing** streams the source, runs every per-row stage and feeds the
//!    `(id, name key)` pair of each accepted row into the identity builder.
//!    Batches are processed in parallel and folded in source order.
//! 2. **Canonicalization** streams the source again, runs the same stages,
//!    stamps each record with its canonical id from the finished index and
//!    hands the batch to the staged writer.
//!
//! Both passes consult the cancellation flag between batches. Nothing is
//! published unless the second pass reaches the end of the source.

use anyhow::{Context, Result};
use chrono::Datelike;
use indicatif::ProgressBar;
use rayon::prelude::*;
use rayon::ThreadPool;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{self, CacheKey};
use crate::classify::EventClassifier;
use crate::config::{ErrorPolicy, PipelineConfig};
use crate::error::{PipelineError, RecordFailure, RowError};
use crate::identity::{name_key, normalize_athlete_id, IdentityBuilder, IdentityIndex};
use crate::mapper::FieldMapper;
use crate::models::{CanonicalRecord, RawRecord};
use crate::overrides::ManualOverrides;
use crate::performance::PerformanceParser;
use crate::reader::ChunkedReader;
use crate::round::{RoundNormalizer, RoundOutcome};
use crate::stats::{RebuildStats, RebuildSummary};
use crate::writer::{StagedOutput, WriteMode};

pub struct IndexOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: PipelineConfig,
    pub overrides: ManualOverrides,
    /// Worker threads; 0 uses one per core
    pub threads: usize,
    pub use_cache: bool,
    pub cancel: Arc<AtomicBool>,
}

pub struct RebuildOptions {
    pub index: IndexOptions,
    /// Partition names to rebuild; empty rebuilds all configured partitions
    pub partitions: Vec<String>,
    pub mode: WriteMode,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct IndexReport {
    pub ids: usize,
    pub names: usize,
    pub from_cache: bool,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct RebuildReport {
    pub summary: RebuildSummary,
    pub index: IndexReport,
    pub canonicalize_duration: Duration,
    pub dry_run: bool,
}

/// A record that passed every per-row stage, still without its canonical id.
pub struct Canonicalized {
    pub record: CanonicalRecord,
    pub round_defaulted: bool,
}

/// Stages 2 to 5 for a single row. Shared by reference across workers.
pub struct RecordProcessor {
    mapper: FieldMapper,
    classifier: EventClassifier,
    performance: PerformanceParser,
    rounds: RoundNormalizer,
}

impl RecordProcessor {
    pub fn new(mapper: FieldMapper, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            mapper,
            classifier: EventClassifier::from_config(&config.classifier)?,
            performance: PerformanceParser::new(config.wind_limit),
            rounds: RoundNormalizer::new(&config.rounds),
        })
    }

    pub fn process(&self, raw: &RawRecord) -> Result<Canonicalized, RecordFailure> {
        let mapped = self.mapper.map(raw)?;
        let row = mapped.row;

        let rule = self
            .classifier
            .classify(&mapped.event_name)
            .map_err(|e| e.at_row(row))?;
        let performance = self
            .performance
            .parse(&mapped.result_text, &mapped.wind, rule)
            .map_err(|e| e.at_row(row))?;
        let round = self
            .rounds
            .normalize(&mapped.round_raw)
            .map_err(|e| e.at_row(row))?;

        let record = CanonicalRecord {
            athlete_name: mapped.athlete_name,
            athlete_id_raw: mapped.athlete_id_raw,
            athlete_id_canonical: String::new(),
            country_code: mapped.country_code,
            gender: mapped.gender,
            date_of_birth: mapped.date_of_birth,
            event_name: mapped.event_name,
            event_kind: rule.kind,
            result_text: mapped.result_text,
            result_numeric: performance.value(),
            wind: mapped.wind,
            competition_id: mapped.competition_id,
            competition_name: mapped.competition_name,
            year: mapped.start_date.year(),
            start_date: mapped.start_date,
            round_raw: mapped.round_raw,
            round_normalized: round.round(),
            position: mapped.position,
            wa_points: mapped.wa_points,
            personal_best: mapped.personal_best,
            season_best: mapped.season_best,
        };

        Ok(Canonicalized {
            record,
            round_defaulted: round == RoundOutcome::Defaulted,
        })
    }

    /// Runs the stages and stamps the canonical id.
    pub fn canonicalize(
        &self,
        raw: &RawRecord,
        index: &IdentityIndex,
    ) -> Result<Canonicalized, RecordFailure> {
        let mut done = self.process(raw)?;
        done.record.athlete_id_canonical = index
            .resolve(&done.record.athlete_id_raw, &done.record.athlete_name)
            .map_err(|e| e.at_row(raw.row))?;
        Ok(done)
    }
}

/// How a row-level failure is handled under `policy`. `Err` aborts the run.
fn triage(failure: RecordFailure, policy: ErrorPolicy) -> Result<RowError, PipelineError> {
    match failure {
        RecordFailure::Row(e) if policy == ErrorPolicy::Tolerant || e.kind.always_quarantined() => {
            Ok(e)
        }
        RecordFailure::Row(e) => Err(PipelineError::Row(e)),
        RecordFailure::Fatal(e) => Err(e),
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        warn!("Cancellation requested, stopping before the next batch");
        return Err(PipelineError::Cancelled.into());
    }
    Ok(())
}

fn build_pool(threads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("podium-worker-{}", i))
        .build()
        .context("Failed to build worker pool")
}

fn open_source(opts: &IndexOptions) -> Result<(ChunkedReader<std::fs::File>, RecordProcessor)> {
    let reader = ChunkedReader::from_path(&opts.input, opts.config.batch_size)
        .with_context(|| format!("Failed to open source: {:?}", opts.input))?;
    let mapper = FieldMapper::new(reader.schema(), reader.headers())?;
    let processor = RecordProcessor::new(mapper, &opts.config)?;
    Ok((reader, processor))
}

fn cache_key(opts: &IndexOptions) -> Result<CacheKey> {
    Ok(CacheKey {
        input_path: opts.input.to_string_lossy().into_owned(),
        overrides: opts.overrides.to_pairs(),
        settings: opts.config.identity_settings()?,
    })
}

/// Indexing pass over the whole source.
fn build_index(opts: &IndexOptions, pool: &ThreadPool) -> Result<IdentityIndex> {
    let (reader, processor) = open_source(opts)?;
    let policy = opts.config.policy;
    let mut builder = IdentityBuilder::new(opts.overrides.clone());
    let pb = ProgressBar::new_spinner();
    let mut rows = 0u64;
    let mut skipped = 0u64;

    info!(path = ?opts.input, "Building identity index");

    for batch in reader {
        check_cancelled(&opts.cancel)?;
        let batch = batch?;

        let results: Vec<Result<Canonicalized, RecordFailure>> = pool.install(|| {
            batch
                .records
                .par_iter()
                .map(|raw| processor.process(raw))
                .collect()
        });

        for result in results {
            match result {
                Ok(done) => {
                    let id = normalize_athlete_id(&done.record.athlete_id_raw);
                    builder.add(&id, name_key(&done.record.athlete_name).as_deref());
                }
                Err(failure) => {
                    triage(failure, policy).context("Indexing pass aborted")?;
                    skipped += 1;
                }
            }
        }

        rows += batch.len() as u64;
        pb.set_message(format!("{} rows indexed", rows));
        pb.tick();
    }

    pb.finish_and_clear();
    let index = builder.finish();
    let (ids, names) = index.stats();
    info!(rows, skipped, ids, names, "Identity index built");
    Ok(index)
}

fn load_or_build_index(
    opts: &IndexOptions,
    pool: &ThreadPool,
    save: bool,
) -> Result<(IdentityIndex, IndexReport)> {
    let start = Instant::now();
    let key = cache_key(opts)?;
    let cache_file = cache::cache_path(&opts.output);

    let cached = if opts.use_cache {
        cache::try_load_index(&cache_file, &key)?
    } else {
        info!("Cache disabled, building fresh index");
        None
    };

    let from_cache = cached.is_some();
    let index = match cached {
        Some(index) => index,
        None => {
            let index = build_index(opts, pool)?;
            if save {
                if let Err(e) = cache::save_index(&index, &key, &opts.output) {
                    warn!(error = %e, "Failed to save identity cache");
                }
            }
            index
        }
    };

    let (ids, names) = index.stats();
    let report = IndexReport {
        ids,
        names,
        from_cache,
        duration: start.elapsed(),
    };
    Ok((index, report))
}

/// Builds (or validates) the identity cache without writing partitions.
pub fn run_index(opts: &IndexOptions) -> Result<IndexReport> {
    let pool = build_pool(opts.threads)?;
    let (_, report) = load_or_build_index(opts, &pool, true)?;
    Ok(report)
}

pub fn run_rebuild(opts: &RebuildOptions) -> Result<RebuildReport> {
    let index_opts = &opts.index;
    let config = &index_opts.config;
    let specs = config.partition_specs(&opts.partitions)?;
    let pool = build_pool(index_opts.threads)?;

    let (index, index_report) = load_or_build_index(index_opts, &pool, !opts.dry_run)?;
    check_cancelled(&index_opts.cancel)?;

    let start = Instant::now();
    let (reader, processor) = open_source(index_opts)?;
    let schema = reader.schema().name();

    let mut output = if opts.dry_run {
        info!("Dry run, no output will be written");
        None
    } else {
        Some(StagedOutput::create(&index_opts.output, specs.clone(), opts.mode)?)
    };

    let stats = RebuildStats::new();
    let mut athletes: FxHashSet<String> = FxHashSet::default();
    let mut dry_counts: BTreeMap<String, u64> =
        specs.iter().map(|s| (s.name().to_string(), 0)).collect();
    let pb = ProgressBar::new_spinner();

    info!(
        partitions = specs.len(),
        policy = ?config.policy,
        "Starting canonicalization pass"
    );

    for batch in reader {
        check_cancelled(&index_opts.cancel)?;
        let batch = batch?;
        stats.add_processed(batch.len() as u64);

        let results: Vec<Result<Canonicalized, RecordFailure>> = pool.install(|| {
            batch
                .records
                .par_iter()
                .map(|raw| processor.canonicalize(raw, &index))
                .collect()
        });

        let mut accepted = Vec::with_capacity(results.len());
        let mut quarantined = Vec::new();
        for result in results {
            match result {
                Ok(done) => {
                    if done.round_defaulted {
                        stats.inc_rounds_defaulted();
                    }
                    if done.record.result_numeric.is_none() {
                        stats.inc_invalid_results();
                    }
                    if !athletes.contains(&done.record.athlete_id_canonical) {
                        athletes.insert(done.record.athlete_id_canonical.clone());
                    }
                    accepted.push(done.record);
                }
                Err(failure) => match triage(failure, config.policy) {
                    Ok(e) => {
                        debug!(row = e.row, kind = e.kind.as_str(), column = %e.column, "Row quarantined");
                        quarantined.push(e);
                    }
                    Err(e) => {
                        if matches!(e, PipelineError::Row(_)) {
                            stats.inc_rejected();
                        }
                        warn!(
                            processed = stats.processed(),
                            accepted = stats.accepted(),
                            quarantined = stats.quarantined(),
                            rejected = stats.rejected(),
                            "Rebuild aborted, nothing published"
                        );
                        return Err(e.into());
                    }
                },
            }
        }

        stats.add_accepted(accepted.len() as u64);
        stats.add_quarantined(quarantined.len() as u64);

        match output.as_mut() {
            Some(out) => {
                pool.install(|| out.write_batch(&accepted))?;
                out.quarantine(&quarantined)?;
            }
            None => {
                for spec in &specs {
                    let hits = accepted.iter().filter(|r| spec.matches(r)).count() as u64;
                    *dry_counts.entry(spec.name().to_string()).or_default() += hits;
                }
            }
        }

        debug!(
            batch = batch.index,
            first_row = ?batch.first_row(),
            accepted = accepted.len(),
            quarantined = quarantined.len(),
            "Batch canonicalized"
        );
        pb.set_message(format!("{} rows canonicalized", stats.processed()));
        pb.tick();
    }
    pb.finish_and_clear();

    check_cancelled(&index_opts.cancel)?;

    let partitions = match &output {
        Some(out) => out.partition_counts(),
        None => dry_counts,
    };
    let summary = stats.summary(schema, athletes.len() as u64, partitions);

    if let Some(out) = output {
        out.commit(&summary)?;
    }

    info!(
        processed = summary.rows_processed,
        accepted = summary.rows_accepted,
        quarantined = summary.rows_quarantined,
        athletes = summary.distinct_athletes,
        "Canonicalization complete"
    );

    Ok(RebuildReport {
        summary,
        index: index_report,
        canonicalize_duration: start.elapsed(),
        dry_run: opts.dry_run,
    })
}
