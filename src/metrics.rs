// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_histogram, histogram, increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
#[allow(dead_code)]
pub enum Unit {
    Count,
    Seconds,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name, $value $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name, $value $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = ($name $(, $label, $label_value)*);
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[allow(unused_imports)]
use crate::{counter, describe_counter, describe_histogram, histogram, increment_counter};

use crate::pipeline::PassReport;
use std::time::Duration;

/// Registers descriptions for every metric the indexer emits. Call once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "ledger_logs_fetched_total",
        Unit::Count,
        "Logs returned by the node across all passes."
    );
    describe_counter!(
        "ledger_logs_skipped_total",
        Unit::Count,
        "Logs without a registered signature for their contract."
    );
    describe_counter!(
        "ledger_events_appended_total",
        Unit::Count,
        "Events newly appended to chain_events."
    );
    describe_counter!(
        "ledger_events_duplicate_total",
        Unit::Count,
        "Events already present in chain_events (re-ingestion)."
    );
    describe_counter!(
        "ledger_projection_gaps_total",
        Unit::Count,
        "Lifecycle events whose entity had no projected row."
    );
    describe_counter!(
        "ledger_passes_total",
        Unit::Count,
        "Completed passes, labeled by outcome (committed, failed)."
    );
    describe_histogram!(
        "ledger_pass_duration_seconds",
        Unit::Seconds,
        "Wall time of a pass from fetch to commit."
    );
}

/// Installs the Prometheus exporter listening on `addr`.
#[cfg(feature = "observability")]
pub fn install_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics exporter: {}", e))?;
    describe_metrics();
    log::info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub fn record_pass_committed(report: &PassReport, duration: Duration) {
    counter!("ledger_logs_fetched_total", report.fetched as u64);
    counter!("ledger_logs_skipped_total", report.skipped as u64);
    counter!("ledger_events_appended_total", report.appended as u64);
    counter!("ledger_events_duplicate_total", report.duplicates as u64);
    counter!("ledger_projection_gaps_total", report.gaps as u64);
    increment_counter!("ledger_passes_total", "outcome" => "committed");
    histogram!("ledger_pass_duration_seconds", duration.as_secs_f64());
}

pub fn record_pass_failed(duration: Duration) {
    increment_counter!("ledger_passes_total", "outcome" => "failed");
    histogram!("ledger_pass_duration_seconds", duration.as_secs_f64());
}
