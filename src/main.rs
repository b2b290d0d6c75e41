//! CLI entry point for the transit ingestion pipeline.
//!
//! Provides subcommands for running one ingestion cycle, watching the feeds
//! on a fixed cadence, and reading persisted records back out of the stores.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use transit_ingest::archive::{BlobArchiver, S3ObjectStore};
use transit_ingest::config::IngestConfig;
use transit_ingest::fetch::BasicClient;
use transit_ingest::pipeline::PipelineCoordinator;
use transit_ingest::records::RecordKind;
use transit_ingest::store::{DynamoTable, RecordStore};

#[derive(Parser)]
#[command(name = "transit_ingest")]
#[command(about = "Ingests GTFS-RT transit feeds into S3 and DynamoDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single fetch→parse→validate→archive→store cycle
    Ingest,
    /// Ingest on a fixed cadence, keeping the dedup cache warm between cycles
    Watch {
        /// Seconds to wait between cycles
        #[arg(short, long, default_value_t = 30)]
        interval_secs: u64,

        /// Number of cycles to run (0 = infinite)
        #[arg(short, long, default_value_t = 0)]
        cycles: usize,

        /// Evict the dedup cache every N cycles (0 = never)
        #[arg(short, long, default_value_t = 120)]
        evict_every: usize,
    },
    /// Query recently stored records
    Recent {
        /// Record kind: "vehicles" or "trip_updates"
        #[arg(short, long, default_value = "vehicles")]
        kind: String,

        /// Route to query; omit for a capped cross-route scan
        #[arg(short, long)]
        route: Option<String>,

        /// Maximum records to return
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
    /// List archived batch objects for one day
    Archives {
        /// Record kind: "vehicles" or "trip_updates"
        #[arg(short, long, default_value = "vehicles")]
        kind: String,

        /// Day to list, YYYYMMDD; defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command {
        Commands::Ingest => {
            let mut coordinator = build_coordinator(&config).await;
            let report = coordinator.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Watch {
            interval_secs,
            cycles,
            evict_every,
        } => {
            watch(&config, interval_secs, cycles, evict_every).await?;
        }
        Commands::Recent { kind, route, limit } => {
            let kind: RecordKind = kind.parse()?;

            let aws = aws_config::load_from_env().await;
            let store = RecordStore::new(
                DynamoTable::new(&aws, &config.dynamo_table),
                config.store_write_concurrency,
            );

            let records = store.query_recent(kind, route.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Archives { kind, date } => {
            let kind: RecordKind = kind.parse()?;
            let date = match date {
                Some(d) => NaiveDate::parse_from_str(&d, "%Y%m%d")?,
                None => chrono::Utc::now().date_naive(),
            };

            let aws = aws_config::load_from_env().await;
            let archiver = BlobArchiver::new(S3ObjectStore::new(&aws, &config.s3_bucket));

            let keys = archiver.list_partitions(kind, date).await?;
            for key in &keys {
                println!("{key}");
            }
            info!(count = keys.len(), date = %date, "Archive objects listed");
        }
    }

    Ok(())
}

async fn build_coordinator(
    config: &IngestConfig,
) -> PipelineCoordinator<BasicClient, S3ObjectStore, DynamoTable> {
    let aws = aws_config::load_from_env().await;

    let archiver = BlobArchiver::new(S3ObjectStore::new(&aws, &config.s3_bucket));
    let store = RecordStore::new(
        DynamoTable::new(&aws, &config.dynamo_table),
        config.store_write_concurrency,
    );

    PipelineCoordinator::new(
        BasicClient::new(),
        archiver,
        store,
        config.vehicle_positions_url.clone(),
        config.trip_updates_url.clone(),
        config.fetch_timeout,
    )
}

/// Fixed-cadence ingestion. One coordinator, and with it one dedup cache,
/// lives for the whole run; the cache is evicted every `evict_every` cycles
/// so memory stays bounded.
#[tracing::instrument(skip(config), fields(interval_secs, cycles, evict_every))]
async fn watch(
    config: &IngestConfig,
    interval_secs: u64,
    cycles: usize,
    evict_every: usize,
) -> Result<()> {
    let mut coordinator = build_coordinator(config).await;

    if cycles == 0 {
        info!(interval_secs, "Ingesting indefinitely. Press Ctrl+C to stop.");
    } else {
        info!(cycles, interval_secs, "Starting ingestion run");
    }

    let mut cycle_count = 0;

    loop {
        if cycles > 0 && cycle_count >= cycles {
            break;
        }
        cycle_count += 1;

        if evict_every > 0 && cycle_count % evict_every == 0 {
            coordinator.evict_dedup_cache();
        }

        info!(
            cycle = cycle_count,
            total = if cycles == 0 { None } else { Some(cycles) },
            "Starting ingestion cycle"
        );

        let report = coordinator.run_cycle().await;
        println!("{}", serde_json::to_string(&report)?);

        if cycles == 0 || cycle_count < cycles {
            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    }

    info!(cycle_count, "Finished ingestion run");
    Ok(())
}
