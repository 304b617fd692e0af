//! Core types and utilities for op-dispatch
//!
//! # Modules
//!
//! - `audit`: Audit events and outcomes
//! - `config`: Environment loading and layered settings
//! - `context`: Per-request execution context
//! - `envelope`: Inbound/outbound request envelopes
//! - `error`: Error taxonomy and Result alias
//! - `session`: Session model and lifecycle
//! - `types`: Parameter descriptors and the normalized type table

pub mod audit;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod session;
pub mod types;

// Re-exports
pub use audit::{AuditEvent, Outcome};
pub use config::Settings;
pub use context::ExecutionContext;
pub use envelope::{ErrorBody, InboundEnvelope, OutboundEnvelope};
pub use error::{Error, ErrorKind, PolicyViolationKind, Result};
pub use session::{Session, SessionKind, SessionStatus};
pub use types::{Constraints, ParamType, ParameterDescriptor};
