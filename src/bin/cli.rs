//! Partsfinder CLI
//!
//! Local execution entry point: scheduled service, one-off ingestion and
//! store inspection.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use partsfinder::{
    build_orchestrator, config,
    error::Result,
    models::{IngestionRun, QueryParams, SourceId, StoredRecord},
    pipeline::Scheduler,
    storage::PartFilter,
};
use tokio_util::sync::CancellationToken;

/// Partsfinder - parts listing ingestion
#[derive(Parser, Debug)]
#[command(
    name = "partsfinder",
    version,
    about = "Ingests parts listings and keeps the stored inventory fresh"
)]
struct Cli {
    /// Path to storage directory containing config.toml and the store
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Search fields; unset ones take the configured defaults.
#[derive(Args, Debug, Default)]
struct QueryArgs {
    #[arg(long)]
    vehicle_type: Option<String>,
    #[arg(long)]
    make: Option<String>,
    #[arg(long)]
    base_model: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    year_from: Option<u16>,
    #[arg(long)]
    year_to: Option<u16>,
    #[arg(long)]
    offset: Option<usize>,
    #[arg(long)]
    limit: Option<usize>,
}

impl From<QueryArgs> for QueryParams {
    fn from(args: QueryArgs) -> Self {
        Self {
            vehicle_type: args.vehicle_type,
            make: args.make,
            base_model: args.base_model,
            model: args.model,
            year_from: args.year_from,
            year_to: args.year_to,
            offset: args.offset,
            limit: args.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scheduled ingestion until interrupted
    Serve {
        /// Trigger all sources once before waiting for the schedule
        #[arg(long)]
        now: bool,
    },

    /// Ingest one source
    Ingest {
        source: u32,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Ingest all sources concurrently
    IngestAll {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Fetch one source without storing anything
    Preview {
        source: u32,
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List stored parts, newest first
    List {
        #[arg(long)]
        source: Option<u32>,
        /// Exact type label
        #[arg(long = "type")]
        type_name: Option<String>,
        /// Only parts created within the last N hours
        #[arg(long)]
        newer_than_hours: Option<i64>,
        /// Case-insensitive text match
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = PartFilter::DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Show one stored part as JSON
    Show { id: i64 },

    /// Delete every stored part of a source
    Purge { source: u32 },

    /// List registered sources
    Sources,

    /// Show the next scheduled trigger times
    Schedule,

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_run(run: &IngestionRun) {
    match &run.error {
        None => println!(
            "source {} ({}): {} fetched, {} new, {} duplicate, {} evicted",
            run.source_id,
            run.source_name,
            run.fetched,
            run.new_count(),
            run.duplicates,
            run.evicted
        ),
        Some(e) => println!("source {}: FAILED: {}", run.source_id, e),
    }
}

fn print_record(record: &StoredRecord) {
    println!(
        "{:>6}  src {:<3} {:<14} {:<40.40}  {:<24.24}  seen {}",
        record.id,
        record.source_id,
        record.external_id,
        record.name,
        record.type_name,
        record.last_seen.format("%Y-%m-%d %H:%M")
    );
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::load_all(&cli.storage_dir)?;
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    if let Command::Validate = cli.command {
        log::info!(
            "✓ Config OK ({} sources, {} cron entries)",
            config.sources.len(),
            config.scheduler.cron.len()
        );
        return Ok(());
    }

    let orchestrator = Arc::new(build_orchestrator(&config, &cli.storage_dir).await?);
    let coordinator = Arc::clone(orchestrator.coordinator());

    match cli.command {
        Command::Serve { now } => {
            if !config.scheduler.enabled {
                log::warn!("Scheduler disabled in configuration, nothing to serve");
                return Ok(());
            }

            if now {
                orchestrator.trigger(&config.scheduler.query).await;
            }

            let scheduler = Arc::new(Scheduler::new(Arc::clone(&orchestrator), &config.scheduler)?);
            for next in scheduler.next_runs() {
                log::info!("Scheduled trigger at {}", next);
            }
            let handle = Arc::clone(&scheduler).spawn();

            tokio::signal::ctrl_c().await?;
            log::info!("Interrupt received, waiting for any running trigger to finish");
            scheduler.stop();
            if let Err(e) = handle.await {
                log::error!("Scheduler task failed: {}", e);
            }
        }

        Command::Ingest { source, query } => {
            let run = coordinator
                .run_ingestion(SourceId(source), &query.into(), &CancellationToken::new())
                .await;
            print_run(&run);
            if let Some(e) = run.error {
                return Err(e);
            }
        }

        Command::IngestAll { query } => {
            let summary = orchestrator.trigger(&query.into()).await;
            for run in &summary.runs {
                print_run(run);
            }
            println!(
                "{} succeeded, {} failed, {} new in {:.2?}",
                summary.succeeded(),
                summary.failed(),
                summary.total_new(),
                summary.duration
            );
        }

        Command::Preview { source, query } => {
            let outcome = coordinator
                .preview(SourceId(source), &query.into(), &CancellationToken::new())
                .await?;
            for record in &outcome.records {
                println!(
                    "{:<14} {:<40.40}  {:<24.24}  {}",
                    record.external_id, record.name, record.type_name, record.url
                );
            }
            println!(
                "{} records over {} pages ({} skipped, stopped: {:?})",
                outcome.records.len(),
                outcome.pages,
                outcome.skipped,
                outcome.stop
            );
        }

        Command::List {
            source,
            type_name,
            newer_than_hours,
            text,
            offset,
            limit,
        } => {
            let filter = PartFilter {
                source_id: source.map(SourceId),
                type_name,
                newer_than: newer_than_hours.map(|h| Utc::now() - Duration::hours(h)),
                text,
                offset,
                limit,
            };
            let records = coordinator.list(&filter).await?;
            let total = coordinator.count(&filter).await?;
            for record in &records {
                print_record(record);
            }
            println!("showing {} of {} parts", records.len(), total);
        }

        Command::Show { id } => {
            let record = coordinator.get(id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Command::Purge { source } => {
            let deleted = coordinator.purge_source(SourceId(source)).await?;
            println!("deleted {} parts of source {}", deleted, source);
        }

        Command::Schedule => {
            let scheduler = Scheduler::new(Arc::clone(&orchestrator), &config.scheduler)?;
            for (expr, next) in config.scheduler.cron.iter().zip(scheduler.next_runs()) {
                println!("{:<20} next at {}", expr, next);
            }
        }

        Command::Sources => {
            for source in coordinator.sources() {
                println!("{:>3}  {:<16} {}", source.id, source.name, source.base_url);
            }
        }

        Command::Validate => {}
    }

    Ok(())
}
