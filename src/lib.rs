//! Podium: athletics results canonicalization and athlete identity resolution
//!
//! This crate rebuilds a set of canonical results files from a raw
//! competition-results export in two passes:
//!
//! 1. **Indexing Pass** -- Stream the export, run every per-row stage and group
//!    athlete ids and name keys into identity clusters, applying the manual
//!    override table. The finished index is cached next to the output
//! 2. **Canonicalization Pass** -- Stream the export again, process batches in
//!    parallel, stamp each record with its canonical athlete id and write it to
//!    every partition whose predicate it satisfies
//!
//! Rows that fail a stage are either quarantined (tolerant policy) or abort the
//! run (strict policy). Output becomes visible only when the whole source has
//! been processed: partitions are written under a staging directory and renamed
//! into place at the end.
//!
//! # Key Modules
//!
//! - [`reader`] -- Header schema detection and batched CSV reading
//! - [`mapper`] -- Source columns to typed fields
//! - [`classify`] -- Event name to event kind and wind relevance
//! - [`performance`] -- Result text to seconds, meters or points
//! - [`round`] -- Round label normalization
//! - [`identity`] -- Name keys, id normalization and cluster resolution
//! - [`overrides`] -- Manual id-to-id override table
//! - [`partition`] -- Partition predicates
//! - [`writer`] -- Staged partition output with atomic commit
//! - [`pipeline`] -- The two passes, batching and error policy
//! - [`cache`] -- Identity index persistence
//! - [`stats`] -- Thread-safe counters and the run summary
//! - [`config`] -- Constants and the TOML pipeline configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Rebuild every partition, quarantining bad rows
//! podium rebuild -i export.csv -o out/
//!
//! # Rebuild only the major-championship file and abort on the first bad row
//! podium rebuild -i export.csv -o out/ --partition major_championships --policy strict
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod identity;
pub mod mapper;
pub mod models;
pub mod overrides;
pub mod partition;
pub mod performance;
pub mod pipeline;
pub mod reader;
pub mod round;
pub mod rules;
pub mod stats;
pub mod writer;
