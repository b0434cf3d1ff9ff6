//! query-guard command line entry point.
//!
//! Evaluates one request against a catalog endpoint:
//!
//! ```text
//! QUERY_GUARD_CATALOG=catalog.json query-guard product_lookup < request.json
//! ```
//!
//! The decision is written to stdout as JSON. Exit code is 0 on allow and
//! 2 on deny.

use anyhow::{bail, Context, Result};
use query_guard::constants::DEFAULT_LOG_FILTER;
use query_guard::{Catalog, Config};
use std::io::Read;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const EXIT_DENY: u8 = 2;

fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries the decision
    init_logging();

    let endpoint_name = match std::env::args().nth(1) {
        Some(name) if name != "-h" && name != "--help" => name,
        _ => {
            eprintln!("usage: query-guard <endpoint> < request.json");
            eprintln!("  catalog path is read from QUERY_GUARD_CATALOG");
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = Config::from_env()?;
    let catalog = Catalog::load(config.require_catalog_path()?, &config)?;

    let Some(endpoint) = catalog.get(&endpoint_name) else {
        let known: Vec<&str> = catalog.names().collect();
        bail!(
            "unknown endpoint '{}' (known: {})",
            endpoint_name,
            known.join(", ")
        );
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    let request: serde_json::Value =
        serde_json::from_str(&input).context("request is not valid JSON")?;
    let Some(fields) = request.as_object() else {
        bail!("request must be a JSON object of field values");
    };

    let decision = endpoint.decide(fields);
    println!("{}", serde_json::to_string_pretty(&decision)?);

    if decision.is_allowed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_DENY))
    }
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
