use anyhow::Result;
use async_trait::async_trait;
use op_core::{ExecutionContext, OutboundEnvelope};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;

use crate::hook::DispatchHook;

/// Dispatch metrics collector
#[derive(Clone)]
pub struct DispatchMetrics {
    /// Total requests received
    requests_started: IntCounter,

    /// Requests currently in flight
    active_requests: IntGauge,

    /// Requests that completed
    requests_completed: IntCounter,

    /// Failed requests by error kind
    requests_failed: IntCounterVec,

    /// Requests answered from the ledger
    requests_replayed: IntCounter,

    /// Request duration histogram
    request_duration: Histogram,

    /// Registry for scraping
    registry: Registry,
}

impl DispatchMetrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_started = IntCounter::new(
            "op_dispatch_requests_started_total",
            "Total number of dispatched requests",
        )?;
        registry.register(Box::new(requests_started.clone()))?;

        let active_requests = IntGauge::new(
            "op_dispatch_active_requests",
            "Number of requests currently in flight",
        )?;
        registry.register(Box::new(active_requests.clone()))?;

        let requests_completed = IntCounter::new(
            "op_dispatch_requests_completed_total",
            "Total number of completed requests",
        )?;
        registry.register(Box::new(requests_completed.clone()))?;

        let requests_failed = IntCounterVec::new(
            Opts::new("op_dispatch_requests_failed_total", "Total number of failed requests"),
            &["kind"],
        )?;
        registry.register(Box::new(requests_failed.clone()))?;

        let requests_replayed = IntCounter::new(
            "op_dispatch_requests_replayed_total",
            "Requests answered from an earlier audited attempt",
        )?;
        registry.register(Box::new(requests_replayed.clone()))?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "op_dispatch_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            requests_started,
            active_requests,
            requests_completed,
            requests_failed,
            requests_replayed,
            request_duration,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn requests_started(&self) -> u64 {
        self.requests_started.get()
    }

    pub fn requests_completed(&self) -> u64 {
        self.requests_completed.get()
    }

    pub fn requests_failed(&self, kind: &str) -> u64 {
        self.requests_failed.with_label_values(&[kind]).get()
    }

    /// Get metrics as JSON (simplified version)
    pub fn get_metrics_json(&self) -> serde_json::Value {
        let metrics: Vec<serde_json::Value> = self
            .registry
            .gather()
            .iter()
            .map(|family| {
                serde_json::json!({
                    "name": family.get_name(),
                    "help": family.get_help(),
                    "metric_count": family.get_metric().len(),
                })
            })
            .collect();

        serde_json::json!({ "metrics": metrics })
    }
}

#[async_trait]
impl DispatchHook for DispatchMetrics {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before(&self, _ctx: &ExecutionContext) -> Result<()> {
        self.requests_started.inc();
        self.active_requests.inc();
        Ok(())
    }

    async fn after(
        &self,
        _ctx: &ExecutionContext,
        response: &OutboundEnvelope,
        elapsed: Duration,
    ) -> Result<()> {
        self.active_requests.dec();
        self.request_duration.observe(elapsed.as_secs_f64());

        if response.replayed {
            self.requests_replayed.inc();
        }
        match response.error_kind() {
            None => self.requests_completed.inc(),
            Some(kind) => self.requests_failed.with_label_values(&[kind.as_str()]).inc(),
        }
        Ok(())
    }
}
