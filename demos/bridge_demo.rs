//! Bridge round-trip demonstration.
//!
//! Demonstrates:
//! - Loading configuration from the environment
//! - Lazy connect on the first request
//! - Concurrent identical reads sharing one round trip
//! - Status snapshot and graceful stop
//!
//! Usage:
//!   cargo run --example bridge_demo
//!   cargo run --example bridge_demo -- --debug
//!
//! Point `MCP_AUTOMATION_PORT` (and optionally `MCP_AUTOMATION_HOST`,
//! `MCP_AUTOMATION_CAPABILITY_TOKEN`) at a running automation listener.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use automation_bridge::{AutomationBridge, RequestOptions, Result};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "automation_bridge=debug"
    } else {
        "automation_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    println!("=== Automation Bridge ===\n");

    let bridge = AutomationBridge::from_env()?;
    let mut events = bridge.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("[Event] {}", event.name());
        }
    });

    // ========================================================================
    // Single request
    // ========================================================================

    println!("[Request] get_project_settings");
    let response = bridge
        .send_automation_request(
            "get_project_settings",
            json!({}),
            RequestOptions::with_timeout(Duration::from_secs(10)),
        )
        .await?;
    println!("        success={}", response.is_success());

    // ========================================================================
    // Coalesced reads
    // ========================================================================

    println!("[Request] 3x list_assets (coalesced)");
    let payload = json!({"directory": "/Game", "recursive": false});
    let (a, b, c) = tokio::join!(
        bridge.send_automation_request("list_assets", payload.clone(), RequestOptions::default()),
        bridge.send_automation_request("list_assets", payload.clone(), RequestOptions::default()),
        bridge.send_automation_request("list_assets", payload, RequestOptions::default()),
    );
    println!("        identical={}", a? == b? && c.is_ok());

    // ========================================================================
    // Status
    // ========================================================================

    let status = bridge.get_status();
    println!("[Status] {}", serde_json::to_string_pretty(&status)?);

    bridge.stop().await;
    println!("\n=== Done ===");
    Ok(())
}
