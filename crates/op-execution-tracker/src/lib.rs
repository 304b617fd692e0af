//! OP Execution Tracker - Dispatch Observation Layer
//!
//! Observes requests flowing through the orchestrator without taking part in
//! their outcome:
//! - Phase tracking (RECEIVED through COMPLETED/FAILED) with event broadcast
//! - Dispatch hooks run around every request
//! - Prometheus metrics and tracing telemetry hooks

pub mod hook;
pub mod metrics;
pub mod phase;
pub mod telemetry;
pub mod tracker;

pub use hook::DispatchHook;
pub use metrics::DispatchMetrics;
pub use phase::{DispatchPhase, DispatchRecord};
pub use telemetry::DispatchTelemetry;
pub use tracker::{DispatchEvent, DispatchTracker};
