use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use resledger::compactor;
use resledger::engine::Engine;
use resledger::limits::MAX_VALID_TIMESTAMP_MS;
use resledger::model::{Booking, Ms, Span, UtilizationRow};

#[derive(Serialize)]
struct Counts {
    events: usize,
    resources: usize,
    allocations: usize,
}

#[derive(Serialize)]
struct Audit {
    window: Span,
    counts: Counts,
    conflicts: Vec<Booking>,
    utilization: Vec<UtilizationRow>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the audit document.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let data_dir = std::env::var("RESLEDGER_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let wal_file = std::env::var("RESLEDGER_WAL_FILE").unwrap_or_else(|_| "ledger.wal".into());
    let window_start: Ms = std::env::var("RESLEDGER_REPORT_START_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let window_end: Ms = std::env::var("RESLEDGER_REPORT_END_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(MAX_VALID_TIMESTAMP_MS);
    let compact_threshold: u64 = std::env::var("RESLEDGER_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join(&wal_file);
    info!("opening ledger at {}", wal_path.display());

    let engine = Engine::new(wal_path)?;
    compactor::compact_if_due(&engine, compact_threshold).await;

    let counts = Counts {
        events: engine.list_events().await.len(),
        resources: engine.list_resources().await.len(),
        allocations: engine.list_allocations().await.len(),
    };
    info!(
        events = counts.events,
        resources = counts.resources,
        allocations = counts.allocations,
        "ledger loaded"
    );

    let conflicts = engine.list_conflicts().await;
    if !conflicts.is_empty() {
        tracing::warn!("{} allocations overlap another event on the same resource", conflicts.len());
    }

    let audit = Audit {
        window: Span {
            start: window_start,
            end: window_end,
        },
        counts,
        conflicts,
        utilization: engine.compute_utilization(window_start, window_end).await,
    };
    println!("{}", serde_json::to_string_pretty(&audit)?);
    Ok(())
}
