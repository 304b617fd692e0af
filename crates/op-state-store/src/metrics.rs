//! Prometheus metrics for state store operations
//!
//! Provides observability into store operations including:
//! - Audit events appended, by outcome
//! - Sessions created, by kind
//! - Operation latencies
//! - Error rates

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Once;
use tracing::info;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Audit events appended
    pub static ref AUDIT_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("op_dispatch_audit_events_total", "Audit events appended"),
        &["outcome"]
    ).unwrap();

    /// Sessions created by find-or-create
    pub static ref SESSIONS_CREATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("op_dispatch_sessions_created_total", "Sessions created"),
        &["kind"]
    ).unwrap();

    /// Store operation latency
    pub static ref STORE_OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("op_dispatch_store_operation_seconds", "Store operation duration")
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation", "store_type"]
    ).unwrap();

    /// Store operation errors
    pub static ref STORE_OP_ERRORS: CounterVec = CounterVec::new(
        Opts::new("op_dispatch_store_errors_total", "Store operation errors"),
        &["operation", "store_type"]
    ).unwrap();
}

static INIT: Once = Once::new();

/// Register all metrics with the global registry
pub fn register_metrics() {
    INIT.call_once(|| {
        info!("Registering state store metrics");
        REGISTRY.register(Box::new(AUDIT_EVENTS_TOTAL.clone())).ok();
        REGISTRY.register(Box::new(SESSIONS_CREATED_TOTAL.clone())).ok();
        REGISTRY.register(Box::new(STORE_OP_DURATION.clone())).ok();
        REGISTRY.register(Box::new(STORE_OP_ERRORS.clone())).ok();
    });
}

/// Helper to time a store operation
pub struct OperationTimer {
    operation: &'static str,
    store_type: &'static str,
    start: std::time::Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str, store_type: &'static str) -> Self {
        Self {
            operation,
            store_type,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        STORE_OP_DURATION
            .with_label_values(&[self.operation, self.store_type])
            .observe(duration);
    }
}

pub fn record_audit_event(outcome: &str) {
    AUDIT_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_session_created(kind: &str) {
    SESSIONS_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_store_error(operation: &str, store_type: &str) {
    STORE_OP_ERRORS.with_label_values(&[operation, store_type]).inc();
}

/// Get metrics as text for Prometheus scraping
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
