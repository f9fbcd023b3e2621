//! Grid Ingestion Coverage Report
//!
//! Prints how much of the grid archive has been stored: total rows, grid
//! points with data, covered time span, rows per year (with coverage against
//! a full year for every point), and a short per-point preview.
//!
//! Usage:
//!   cargo run --bin grid_stats
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string (from .env)

use gridwx_service::model::GRID_TABLE;
use gridwx_service::stats::{query_grid_stats, GridStats};

const PREVIEW_POINTS: i64 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 Grid Weather Data Coverage");
    println!("==============================\n");

    let mut client = gridwx_service::db::connect_and_verify(&[GRID_TABLE])
        .unwrap_or_else(|e| {
            eprintln!("\n{}\n", e);
            std::process::exit(1);
        });

    let stats = query_grid_stats(&mut client, PREVIEW_POINTS)?;

    println!("   Total records:     {}", stats.total_rows);
    println!("   Grid points:       {}", stats.grid_points);
    match (stats.first_timestamp, stats.last_timestamp) {
        (Some(first), Some(last)) => {
            println!("   First timestamp:   {}", first);
            println!("   Last timestamp:    {}", last);
        }
        _ => {
            println!("\n⚠ Table is empty, nothing ingested yet");
            return Ok(());
        }
    }

    println!("\n--- By year ---\n");
    println!("   {:<6} {:>12} {:>10}", "Year", "Records", "Coverage");
    for y in &stats.by_year {
        let coverage = stats
            .year_coverage(y.year)
            .map(|c| format!("{:.1}%", c * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!("   {:<6} {:>12} {:>10}", y.year, y.rows, coverage);
    }

    println!("\n--- Grid point preview (first {}) ---\n", PREVIEW_POINTS);
    println!("   {:>10} {:>10} {:>12}", "Latitude", "Longitude", "Records");
    for p in &stats.preview {
        println!("   {:>10.2} {:>10.2} {:>12}", p.latitude, p.longitude, p.rows);
    }

    let full_years = stats
        .by_year
        .iter()
        .filter(|y| y.rows >= stats.grid_points * GridStats::expected_rows_per_point(y.year))
        .count();
    println!("\n✓ {} of {} years fully covered", full_years, stats.by_year.len());

    Ok(())
}
