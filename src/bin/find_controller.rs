//! Proxy Controller Finder
//!
//! Probes the configured candidate ports for the proxy controller API and,
//! when found, lists the nodes the ingest would rotate through.
//!
//! Usage:
//!   cargo run --bin find_controller
//!   cargo run --bin find_controller -- --config other.toml
//!
//! Environment:
//!   EGRESS_SECRET - proxy controller secret (optional)

use gridwx_service::config::{Config, DEFAULT_CONFIG_PATH};
use gridwx_service::egress::{probe_controller, ProxyController};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Proxy Controller Finder");
    println!("==========================\n");

    let args: Vec<String> = env::args().collect();
    let config_path = match args.get(1).map(String::as_str) {
        Some("--config") => args.get(2).cloned().unwrap_or_else(|| {
            eprintln!("Error: --config requires a path");
            std::process::exit(1);
        }),
        Some(other) => {
            eprintln!("Unknown argument: {}", other);
            std::process::exit(1);
        }
        None => DEFAULT_CONFIG_PATH.to_string(),
    };

    dotenv::dotenv().ok();
    let config = Config::load(&config_path)?;
    let egress = &config.egress;

    println!("   Host:  {}", egress.host);
    println!("   Ports: {:?}\n", egress.candidate_ports);

    let base_url = match probe_controller(&egress.host, &egress.candidate_ports, egress.probe_timeout()) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Check that the proxy client is running with its external controller enabled");
            std::process::exit(1);
        }
    };
    println!("✓ Controller answering at {}\n", base_url);

    match ProxyController::connect(&base_url, egress, None) {
        Ok(controller) => {
            println!("📋 Group '{}' has {} usable nodes:", egress.group, controller.nodes().len());
            for node in controller.nodes() {
                println!("   - {}", node);
            }
        }
        Err(e) => {
            eprintln!("⚠ Controller found but node discovery failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
