use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use podium::config::{ErrorPolicy, PipelineConfig};
use podium::error::PipelineError;
use podium::overrides::ManualOverrides;
use podium::pipeline::{self, IndexOptions, RebuildOptions};
use podium::writer::WriteMode;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit status after SIGINT or SIGTERM
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "podium")]
#[command(about = "Canonicalize athletics results and resolve athlete identities")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild canonical partitions from a results export
    Rebuild(RebuildArgs),
    /// Build the identity index cache without writing partitions
    Index(IndexArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Path to the results export (';'-delimited CSV)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for partitions, quarantine, summary and cache
    #[arg(short, long)]
    output: PathBuf,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Pipeline configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Manual identity override table (TOML); the built-in table otherwise
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Force rebuild of the identity cache
    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct RebuildArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Partition to rebuild (repeatable; default all)
    #[arg(long = "partition")]
    partitions: Vec<String>,

    /// What to do with rows that fail a stage
    #[arg(long, value_enum)]
    policy: Option<ErrorPolicy>,

    /// Add rows to the published partitions instead of replacing them
    #[arg(long)]
    append: bool,

    /// Dry run - don't write output files
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct IndexArgs {
    #[command(flatten)]
    source: SourceArgs,
}

fn index_options(args: SourceArgs, cancel: Arc<AtomicBool>) -> Result<IndexOptions> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let overrides = match &args.overrides {
        Some(path) => ManualOverrides::load(path)?,
        None => ManualOverrides::builtin().context("Built-in override table is invalid")?,
    };
    info!(overrides = overrides.len(), "Loaded manual overrides");

    Ok(IndexOptions {
        input: args.input,
        output: args.output,
        config,
        overrides,
        threads: args.threads,
        use_cache: !args.no_cache,
        cancel,
    })
}

fn run_rebuild(args: RebuildArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    let mut index = index_options(args.source, cancel)?;
    if let Some(batch_size) = args.batch_size {
        index.config.batch_size = batch_size;
    }
    if let Some(policy) = args.policy {
        index.config.policy = policy;
    }
    if index.config.batch_size == 0 {
        bail!("Batch size must be at least 1");
    }

    let opts = RebuildOptions {
        index,
        partitions: args.partitions,
        mode: if args.append {
            WriteMode::Append
        } else {
            WriteMode::Replace
        },
        dry_run: args.dry_run,
    };

    let report = pipeline::run_rebuild(&opts)?;
    let summary = &report.summary;

    println!();
    println!("=== Summary ===");
    println!(
        "Indexing time:        {:.2}s{}",
        report.index.duration.as_secs_f64(),
        if report.index.from_cache { " (cached)" } else { "" }
    );
    println!(
        "Canonicalize time:    {:.2}s",
        report.canonicalize_duration.as_secs_f64()
    );
    println!();
    println!("Source schema:        {}", summary.schema);
    println!("Rows processed:       {}", summary.rows_processed);
    println!("Rows accepted:        {}", summary.rows_accepted);
    println!("Rows quarantined:     {}", summary.rows_quarantined);
    println!("Invalid results:      {}", summary.invalid_results);
    println!("Rounds defaulted:     {}", summary.rounds_defaulted);
    println!("Distinct athletes:    {}", summary.distinct_athletes);
    for (name, rows) in &summary.partitions {
        println!("  {:<20}{}", name, rows);
    }
    if report.dry_run {
        println!();
        println!("Dry run: nothing was written");
    }

    Ok(())
}

fn run_index(args: IndexArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    let opts = index_options(args.source, cancel)?;
    let report = pipeline::run_index(&opts)?;

    println!();
    println!("=== Summary ===");
    println!(
        "Indexing time:        {:.2}s{}",
        report.duration.as_secs_f64(),
        if report.from_cache { " (cached)" } else { "" }
    );
    println!("Athlete ids:          {}", report.ids);
    println!("Id-less name keys:    {}", report.names);

    Ok(())
}

fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&cancel))
            .with_context(|| format!("Failed to register handler for signal {}", signal))?;
    }
    Ok(cancel)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = install_cancel_handler().and_then(|cancel| match cli.command {
        Commands::Rebuild(args) => run_rebuild(args, cancel),
        Commands::Index(args) => run_index(args, cancel),
    });

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Cancelled)) {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
