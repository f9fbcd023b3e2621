//! Grid Weather Ingest - Main Pipeline
//!
//! Backfills hourly archive weather for every grid point, one calendar year
//! per request, into `grid_weather_data`:
//! 1. Loads the grid and splits it into small chunks
//! 2. Locates the proxy controller for egress rotation (optional)
//! 3. Fetches each (chunk, year) window, rotating egress on quota errors
//! 4. Writes records idempotently; re-running only fills gaps
//!
//! Usage:
//!   cargo run --release                            # Full run with gridwx.toml
//!   cargo run --release -- --config other.toml     # Alternate configuration
//!   cargo run --release -- --grid points.csv       # Override grid file
//!   cargo run --release -- --resume                # Skip windows stored by an earlier run
//!
//! Environment:
//!   DATABASE_URL  - PostgreSQL connection string
//!   EGRESS_SECRET - proxy controller secret (optional)
//!   RUST_LOG      - log filter (overrides [logging] level)

use gridwx_service::checkpoint::{Checkpoint, GridFingerprint, STATE_FILE};
use gridwx_service::config::{Config, DEFAULT_CONFIG_PATH};
use gridwx_service::db;
use gridwx_service::egress::Egress;
use gridwx_service::grid::load_grid_csv;
use gridwx_service::ingest::archive::ArchiveClient;
use gridwx_service::logging::init_tracing;
use gridwx_service::model::GRID_TABLE;
use gridwx_service::pipeline::{Pacing, Pipeline, RetryPolicy, ThreadSleeper};
use gridwx_service::sink::PostgresSink;
use gridwx_service::windows::{SystemClock, YearRange};
use std::env;

fn usage(program: &str) -> String {
    format!("Usage: {} [--config PATH] [--grid PATH] [--resume]", program)
}

fn main() {
    println!("🌐 Grid Weather Ingest");
    println!("======================\n");

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut grid_override: Option<String> = None;
    let mut resume = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--grid" => {
                if i + 1 < args.len() {
                    if args[i] == "--config" {
                        config_path = args[i + 1].clone();
                    } else {
                        grid_override = Some(args[i + 1].clone());
                    }
                    i += 2;
                } else {
                    eprintln!("Error: {} requires a path", args[i]);
                    std::process::exit(1);
                }
            }
            "--resume" => {
                resume = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", usage(&args[0]));
                return;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("{}", usage(&args[0]));
                std::process::exit(1);
            }
        }
    }

    // .env may carry DATABASE_URL and EGRESS_SECRET
    dotenv::dotenv().ok();

    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            if let Some(source) = std::error::Error::source(&e) {
                eprintln!("   {}", source);
            }
            std::process::exit(1);
        }
    };
    if let Some(path) = grid_override {
        config.grid.path = path;
    }

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("⚠ Could not open log file: {} (logging to stderr only)", e);
    }

    // Database is the only hard startup requirement
    println!("📊 Connecting to database...");
    let client = match db::connect_and_verify(&[GRID_TABLE]) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("\n❌ Database setup failed: {}\n", e);
            std::process::exit(1);
        }
    };
    println!("✓ Database ready\n");

    println!("📍 Loading grid from {}...", config.grid.path);
    let points = match load_grid_csv(&config.grid.path) {
        Ok(points) => points,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let range = YearRange::bounded(config.range.start_year, config.range.end_year, &SystemClock);
    let chunk_size = config.grid.chunk_size;
    println!("   Points:     {}", points.len());
    println!("   Chunk size: {} ({} chunks)", chunk_size, points.len().div_ceil(chunk_size.get()));
    println!("   Years:      {} to {}", range.start, range.end);
    if range.is_empty() {
        println!("\n✓ Nothing to fetch: start year is after the current year");
        return;
    }
    println!();

    let archive = match ArchiveClient::new(&config.archive) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("🔀 Locating proxy controller...");
    let egress = Egress::discover(&config.egress, config.archive.proxy_url.as_deref());
    match &egress {
        Egress::Active(controller) => println!(
            "✓ Controller at {} with {} nodes in '{}'\n",
            controller.base_url(),
            controller.nodes().len(),
            config.egress.group
        ),
        Egress::Disabled => println!("⚠ Egress rotation disabled; quota errors will only back off\n"),
    }

    let mut pipeline = Pipeline::new(
        archive,
        egress,
        PostgresSink::new(client),
        ThreadSleeper,
        RetryPolicy::from(&config.retry),
        Pacing::from(&config.pacing),
    );

    if resume {
        let fingerprint = GridFingerprint {
            points: points.len(),
            chunk_size: chunk_size.get(),
        };
        match Checkpoint::open(STATE_FILE, fingerprint) {
            Ok(checkpoint) => {
                println!("📋 Resuming: {} windows already stored\n", checkpoint.state().completed_windows());
                pipeline = pipeline.with_checkpoint(checkpoint);
            }
            Err(e) => {
                eprintln!("❌ {}", e);
                eprintln!("   Delete {} to start over", STATE_FILE);
                std::process::exit(1);
            }
        }
    }

    println!("🔄 Starting ingest (Ctrl+C stops after the current request)\n");
    let report = match pipeline.run(&points, chunk_size, range) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("\n❌ Ingest stopped: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n{}", "=".repeat(50));
    println!("📊 Ingest Summary");
    println!("{}", "=".repeat(50));
    println!("   Chunks:            {}", report.chunks);
    println!("   Windows attempted: {}", report.windows_attempted);
    println!("   Windows stored:    {}", report.windows_stored);
    if report.windows_skipped > 0 {
        println!("   Windows skipped:   {} (already stored)", report.windows_skipped);
    }
    println!("   Records written:   {}", report.records_written);
    println!("   Egress rotations:  {}", report.rotations);

    if report.abandoned.is_empty() {
        println!("\n✓ All windows stored");
    } else {
        println!("\n⚠ {} windows abandoned (re-run to fill gaps):", report.abandoned.len());
        for w in &report.abandoned {
            println!("   chunk {} year {}: {}", w.chunk_index, w.year, w.reason);
        }
    }
}
