//! Station Sample Refresh
//!
//! Fetches the last few days of hourly temperature, humidity and wind for
//! one station from the forecast API and stores them in `weather_samples`.
//! Unlike the grid table, existing rows are overwritten: recent forecast
//! hours get revised as observations come in.
//!
//! Usage:
//!   cargo run --bin fetch_sample
//!   cargo run --bin fetch_sample -- --lat 31.23 --lon 121.47 --days 5
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string (from .env)

use gridwx_service::config::{Config, DEFAULT_CONFIG_PATH};
use gridwx_service::ingest::build_http_client;
use gridwx_service::ingest::forecast::{
    fetch_recent_samples, FORECAST_BASE_URL, SAMPLE_LATITUDE, SAMPLE_LONGITUDE,
};
use gridwx_service::logging::init_tracing;
use gridwx_service::sink::{upsert_samples, SAMPLE_TABLE};
use std::env;
use std::time::Duration;

const DEFAULT_PAST_DAYS: u32 = 3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🌤  Station Sample Refresh");
    println!("==========================\n");

    let args: Vec<String> = env::args().collect();
    let mut latitude = SAMPLE_LATITUDE;
    let mut longitude = SAMPLE_LONGITUDE;
    let mut past_days = DEFAULT_PAST_DAYS;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--lat", Some(v)) => latitude = v.parse()?,
            ("--lon", Some(v)) => longitude = v.parse()?,
            ("--days", Some(v)) => past_days = v.parse()?,
            (flag, _) => {
                eprintln!("Unknown or incomplete argument: {}", flag);
                eprintln!("Usage: {} [--lat DEG] [--lon DEG] [--days N]", args[0]);
                std::process::exit(1);
            }
        }
        i += 2;
    }

    dotenv::dotenv().ok();
    let config = Config::load(DEFAULT_CONFIG_PATH)?;
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("⚠ Could not open log file: {} (logging to stderr only)", e);
    }

    let mut client = gridwx_service::db::connect_and_verify(&[SAMPLE_TABLE])
        .unwrap_or_else(|e| {
            eprintln!("\n{}\n", e);
            std::process::exit(1);
        });

    println!("📥 Fetching {} days for ({}, {})...", past_days, latitude, longitude);
    let http = build_http_client(Duration::from_secs(10), config.archive.proxy_url.as_deref())?;
    let samples = fetch_recent_samples(&http, FORECAST_BASE_URL, latitude, longitude, past_days)?;

    if samples.is_empty() {
        println!("⚠ No data found in response");
        return Ok(());
    }

    let count = upsert_samples(&mut client, &samples)?;
    println!("✓ Inserted/updated {} samples", count);

    Ok(())
}
