//! radar-sync CLI - mirror new radar frames from a WMS endpoint.

use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use radar_sync::state::StateStore;
use radar_sync::sync::{CancelToken, RetryPolicy, SyncOptions, Synchronizer, WmsFetcher};
use radar_sync::{load_tile_config, logging, JsonCatalog, SyncError};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://www.dmi.dk/ZoombareKort/map";

const EXIT_PARTIAL: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "radar-sync")]
#[command(about = "Save new WMS radar tiles since the last run", long_about = None)]
struct Args {
    /// Layer catalog (JSON with layer names, CRS, bbox and time dimension)
    #[arg(long)]
    catalog: PathBuf,

    /// WMS GetMap endpoint
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Where tiles are stored (default: $RADAR_SYNC_DATA_DIR or ./data)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Watermark file (default: <output-dir>/state.json)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Tile configuration (JSON or YAML)
    #[arg(long)]
    tile_config: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Skip frames older than this many hours (0 disables the cutoff)
    #[arg(long, default_value = "12")]
    max_age_hours: f64,

    /// Attempts per tile for transient failures
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Report what would be fetched without fetching or writing
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(long)]
    verbose: bool,
}

fn max_age(hours: f64) -> Option<Duration> {
    if !(hours.is_finite() && hours > 0.0) {
        return None;
    }
    // Float-to-int casts saturate; anything beyond TimeDelta's range is "forever".
    let seconds = (hours * 3600.0).round() as i64;
    Some(Duration::try_seconds(seconds).unwrap_or(Duration::MAX))
}

fn run(args: Args) -> anyhow::Result<i32> {
    let output_dir = args.output_dir.unwrap_or_else(radar_sync::default_output_dir);
    let state_file = args
        .state_file
        .unwrap_or_else(|| radar_sync::layout::Layout::new(&output_dir).default_state_file());

    let tile_config = load_tile_config(args.tile_config.as_deref()).map_err(SyncError::from)?;
    let fetcher = WmsFetcher::new(&args.base_url, std::time::Duration::from_secs(args.timeout))
        .with_context(|| format!("Invalid WMS endpoint: {}", args.base_url))?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("Failed to install Ctrl-C handler")?;

    let options = SyncOptions {
        dry_run: args.dry_run,
        max_age: max_age(args.max_age_hours),
        retry: RetryPolicy {
            max_attempts: args.retries,
            ..RetryPolicy::default()
        },
        ..SyncOptions::new(output_dir)
    };
    let synchronizer = Synchronizer::new(Arc::new(fetcher), StateStore::new(state_file), options)
        .with_cancel_token(cancel);

    let (_, report) = synchronizer.run(&JsonCatalog::new(&args.catalog), &tile_config)?;
    print!("{report}");

    Ok(if report.cancelled {
        EXIT_CANCELLED
    } else if report.has_failures() {
        EXIT_PARTIAL
    } else {
        0
    })
}

fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };
    process::exit(code);
}
