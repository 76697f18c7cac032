//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Flow outcomes and durations
//! - Reconciliation scans
//! - Pending bridges by readiness
//! - Chain heights and health checks

use crate::error::{BridgeError, BridgeResult};
use crate::reconcile::{BridgeStatus, ScanResult};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Flow metrics
    pub static ref FLOWS_STARTED: CounterVec = register_counter_vec!(
        "lending_bridge_flows_started_total",
        "Total flows started by kind",
        &["flow"]
    ).unwrap();

    pub static ref FLOWS_COMPLETED: CounterVec = register_counter_vec!(
        "lending_bridge_flows_completed_total",
        "Total flows completed by kind",
        &["flow"]
    ).unwrap();

    pub static ref FLOWS_PENDING: CounterVec = register_counter_vec!(
        "lending_bridge_flows_pending_total",
        "Total flows that stopped waiting on the other chain",
        &["flow"]
    ).unwrap();

    pub static ref FLOWS_FAILED: CounterVec = register_counter_vec!(
        "lending_bridge_flows_failed_total",
        "Total flows failed by kind and error",
        &["flow", "error"]
    ).unwrap();

    pub static ref FLOW_DURATION: HistogramVec = register_histogram_vec!(
        "lending_bridge_flow_duration_seconds",
        "Duration of completed flows",
        &["flow"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    // Reconciliation metrics
    pub static ref SCAN_EVENTS: CounterVec = register_counter_vec!(
        "lending_bridge_scan_events_total",
        "Bridge events read by reconciliation scans",
        &["result"]
    ).unwrap();

    pub static ref PENDING_BRIDGES: GaugeVec = register_gauge_vec!(
        "lending_bridge_pending_bridges",
        "Bridges held for this client by readiness",
        &["status"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "lending_bridge_chain_block_height",
        "Latest observed block per chain",
        &["chain"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "lending_bridge_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "lending_bridge_health_check_failure_total",
        "Total failed health checks",
        &["component"]
    ).unwrap();
}

/// Render every registered metric in the text exposition format
pub fn encode() -> BridgeResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BridgeError::Encoding(format!("metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| BridgeError::Encoding(format!("metrics: {}", e)))
}

// Helper functions to record metrics

pub fn record_flow_started(flow: &str) {
    FLOWS_STARTED.with_label_values(&[flow]).inc();
}

pub fn record_flow_completed(flow: &str, duration_secs: f64) {
    FLOWS_COMPLETED.with_label_values(&[flow]).inc();
    FLOW_DURATION.with_label_values(&[flow]).observe(duration_secs);
}

pub fn record_flow_pending(flow: &str) {
    FLOWS_PENDING.with_label_values(&[flow]).inc();
}

pub fn record_flow_failed(flow: &str, error: &str) {
    FLOWS_FAILED.with_label_values(&[flow, error]).inc();
}

pub fn record_scan(result: &ScanResult) {
    let unmatched = result.total_events.saturating_sub(result.matched_events);
    SCAN_EVENTS
        .with_label_values(&["matched"])
        .inc_by(result.matched_events as f64);
    SCAN_EVENTS
        .with_label_values(&["unmatched"])
        .inc_by(unmatched as f64);

    for status in [BridgeStatus::Pending, BridgeStatus::Ready, BridgeStatus::Unknown] {
        PENDING_BRIDGES
            .with_label_values(&[status.as_str()])
            .set(result.count(status) as f64);
    }
}

pub fn record_block_height(chain: &str, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure(component: &str) {
    HEALTH_CHECK_FAILURE.with_label_values(&[component]).inc();
}
