//! Runs a GraphQL query against the ESO Logs API.
//!
//! Demonstrates:
//! - Building a client with the token from `ESOLOGS_TOKEN`
//! - Executing queries with variables
//! - Inspecting rate-limit data
//! - Closing and reconnecting the session
//!
//! Usage:
//!   ESOLOGS_TOKEN=... cargo run --example query
//!   ESOLOGS_TOKEN=... cargo run --example query -- --debug
//!   ESOLOGS_TOKEN=... cargo run --example query -- --report a1b2c3d4

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use esologs_client::{Client, EnvToken, Request};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const RATE_LIMIT_QUERY: &str = "{ rateLimitData { limitPerHour pointsSpentThisHour pointsResetIn } }";

const REPORT_QUERY: &str = "query($code: String) { reportData { report(code: $code) { title startTime endTime zone { name } } } }";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    report: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let report = args
            .iter()
            .position(|a| a == "--report")
            .and_then(|i| args.get(i + 1))
            .cloned();

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            report,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== ESO Logs query ===\n");

    let client = Client::builder()
        .token_provider(EnvToken::default())
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("building client")?;

    // ========================================================================
    // Rate Limit
    // ========================================================================

    println!("[1] Rate limit");
    let response = client
        .execute(&Request::new(RATE_LIMIT_QUERY))
        .await
        .context("rate limit query")?;
    println!(
        "    spent {} of {} points",
        response
            .data_at("/rateLimitData/pointsSpentThisHour")
            .cloned()
            .unwrap_or_default(),
        response
            .data_at("/rateLimitData/limitPerHour")
            .cloned()
            .unwrap_or_default(),
    );
    println!("    session {:?}\n", client.session_id());

    // ========================================================================
    // Report
    // ========================================================================

    if let Some(code) = args.report {
        println!("[2] Report {code}");
        let request = Request::new(REPORT_QUERY).variable("code", code);
        let response = client.execute(&request).await.context("report query")?;
        let report = response
            .data_at("/reportData/report")
            .cloned()
            .unwrap_or_default();
        println!("    {}\n", serde_json::to_string_pretty(&report)?);
    }

    // ========================================================================
    // Reconnect
    // ========================================================================

    println!("[3] Close and execute again");
    client.close().await;
    println!("    state after close: {}", client.state());
    client
        .execute(&Request::new(RATE_LIMIT_QUERY))
        .await
        .context("query after close")?;
    println!("    state after query: {} (session {:?})", client.state(), client.session_id());

    client.close().await;
    println!("\n=== Done ===");
    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "esologs_client=debug"
    } else {
        "esologs_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}
