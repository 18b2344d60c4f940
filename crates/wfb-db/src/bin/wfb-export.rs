//! wfb-export: command-line export of stored waveform events.
//!
//! Prints one event as a JSON document, a CSV grid or chart JSON, and lists
//! locations, series definitions and series sets. Connection settings come from the
//! environment (`DATABASE_URL`, `WFB_DATA_DIR`, ...), optionally via `.env`.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wfb_core::time::{parse_local_date, parse_local_datetime};
use wfb_db::{
    resolve_series_selection, to_chart_json, to_csv, to_json, Database, DbConfig, EventFilter,
    EventQueryOptions, EventRepository, LabelPredicate, SeriesFilter, SeriesRepository, SeriesSetFilter,
};

#[derive(Parser)]
#[command(name = "wfb-export")]
#[command(author, version, about = "Export waveform events")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Csv,
    Chart,
}

#[derive(Subcommand)]
enum Commands {
    /// Export one event, by id or the most recent matching the filters
    Event {
        /// Event id (default: most recent event matching the filters)
        #[arg(long)]
        id: Option<i64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,

        /// Only include waveforms in these series (repeatable)
        #[arg(short, long)]
        series: Vec<String>,

        /// Also include every series of these named sets (repeatable)
        #[arg(long = "series-set")]
        series_set: Vec<String>,

        /// Omit capture files from JSON output
        #[arg(long)]
        summary: bool,

        /// Earliest event time, local `yyyy-MM-dd[ HH:mm:ss.S]`
        #[arg(long)]
        begin: Option<String>,

        /// Latest event time, local `yyyy-MM-dd[ HH:mm:ss.S]`
        #[arg(long)]
        end: Option<String>,

        /// System name
        #[arg(long)]
        system: Option<String>,

        /// Location (repeatable)
        #[arg(short, long)]
        location: Vec<String>,

        /// Classification (repeatable)
        #[arg(long)]
        classification: Vec<String>,

        /// Archived events only (true) or unarchived only (false)
        #[arg(long)]
        archive: Option<bool>,

        /// Minimum number of capture files
        #[arg(long)]
        min_capture_files: Option<i32>,

        /// Only events carrying at least one label
        #[arg(long)]
        labeled: bool,
    },

    /// List the locations that have events
    Locations,

    /// List series definitions
    Series {
        /// System name
        #[arg(long)]
        system: Option<String>,
    },

    /// List series sets and their member series
    SeriesSets {
        /// System name
        #[arg(long)]
        system: Option<String>,
    },
}

/// Accept either a date or a date-time.
fn parse_time(s: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    parse_local_datetime(s)
        .or_else(|_| parse_local_date(s))
        .map_err(|e| anyhow!(e))
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "wfb_db=info,wfb_core=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "wfb_db=info,wfb_core=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("wfb-export.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        // stdout carries the export
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();
    let cli = Cli::parse();

    let config = DbConfig::from_env().context("Loading configuration")?;
    let db = Database::from_config(&config).await.context("Connecting to database")?;

    match cli.command {
        Commands::Event {
            id,
            format,
            series,
            series_set,
            summary,
            begin,
            end,
            system,
            location,
            classification,
            archive,
            min_capture_files,
            labeled,
        } => {
            let mut filter = EventFilter::new();
            if let Some(begin) = begin.as_deref() {
                filter = filter.with_begin(parse_time(begin)?);
            }
            if let Some(end) = end.as_deref() {
                filter = filter.with_end(parse_time(end)?);
            }
            if let Some(system) = system {
                filter = filter.with_system(system);
            }
            if !location.is_empty() {
                filter = filter.with_locations(location);
            }
            if !classification.is_empty() {
                filter = filter.with_classifications(classification);
            }
            if let Some(archive) = archive {
                filter = filter.with_archive(archive);
            }
            if let Some(min) = min_capture_files {
                filter = filter.with_min_capture_files(min);
            }
            if labeled {
                filter = filter.with_label_predicate(LabelPredicate::any_label());
            }

            let id = match id {
                Some(id) => id,
                None => db
                    .events
                    .most_recent_id(&filter)
                    .await?
                    .ok_or_else(|| anyhow!("No event matches the given filters"))?,
            };

            let options = if summary && format == Format::Json {
                EventQueryOptions {
                    include_labels: true,
                    ..EventQueryOptions::summary()
                }
            } else {
                EventQueryOptions::full()
            };
            let event = db.events.get(id, options).await?;

            let series = resolve_series_selection(&db.series, event.system(), &series, &series_set).await?;
            let output = match format {
                Format::Json => to_json(&event, series.as_ref())?,
                Format::Chart => to_chart_json(&event, series.as_ref())?,
                Format::Csv => match to_csv(&event, series.as_ref()) {
                    Some(csv) => csv,
                    None => bail!("Event {} has no waveforms to export", id),
                },
            };
            print!("{}", output);
            if format != Format::Csv {
                println!();
            }
        }
        Commands::Locations => {
            for location in db.events.location_names().await? {
                println!("{}", location);
            }
        }
        Commands::Series { system } => {
            let mut filter = SeriesFilter::new();
            if let Some(system) = system {
                filter = filter.with_system(system);
            }
            for s in db.series.list(&filter).await? {
                println!("{}\t{}\t{}\t{}", s.id, s.system, s.name, s.pattern);
            }
        }
        Commands::SeriesSets { system } => {
            let mut filter = SeriesSetFilter::new();
            if let Some(system) = system {
                filter = filter.with_system(system);
            }
            for set in db.series.list_sets(&filter).await? {
                let members: Vec<&str> = set.series.iter().map(|s| s.name.as_str()).collect();
                println!("{}\t{}\t{}\t{}", set.id, set.system, set.name, members.join(","));
            }
        }
    }

    Ok(())
}
