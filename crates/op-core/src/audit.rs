//! Audit events
//!
//! One event per dispatched request. Events are append-only and form the
//! trail actor -> session -> event -> resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::ErrorKind;

/// Final outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "COMPLETED",
            Outcome::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(Outcome::Completed),
            "FAILED" => Some(Outcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one dispatched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    /// Position within the session trail, assigned by the ledger on append
    pub sequence: u64,
    pub correlation_id: String,
    #[serde(default)]
    pub parent_correlation_id: Option<String>,
    pub actor_id: String,
    pub session_id: Option<String>,
    pub resource_id: Option<String>,
    pub operation_name: String,
    pub request_snapshot: Value,
    pub response_snapshot: Value,
    /// `response_snapshot` is the full result, neither redacted nor truncated
    #[serde(default)]
    pub response_complete: bool,
    pub outcome: Outcome,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from the request context. Snapshots should already be
    /// redacted and truncated.
    pub fn from_context(
        ctx: &ExecutionContext,
        request_snapshot: Value,
        response_snapshot: Value,
        outcome: Outcome,
        error_kind: Option<ErrorKind>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: 0,
            correlation_id: ctx.correlation_id.clone(),
            parent_correlation_id: ctx.parent_correlation_id.clone(),
            actor_id: ctx.actor_id.clone(),
            session_id: ctx.session_id.clone(),
            resource_id: ctx.resource_id.clone(),
            operation_name: ctx.operation.clone(),
            request_snapshot,
            response_snapshot,
            response_complete: false,
            outcome,
            error_kind,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Mark whether the response snapshot can stand in for the result
    pub fn with_complete_response(mut self, complete: bool) -> Self {
        self.response_complete = complete;
        self
    }
}

/// Placeholder written over redacted fields
pub const REDACTED: &str = "[REDACTED]";

/// Replace the values of any object key in `fields` (case-insensitive), recursively
pub fn redact(value: &Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if fields.iter().any(|f| f.eq_ignore_ascii_case(k)) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact(v, fields))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact(v, fields)).collect()),
        other => other.clone(),
    }
}

/// Redact then truncate a payload for storage in an audit event
pub fn snapshot(value: &Value, redact_fields: &[String], max_bytes: usize) -> Value {
    let redacted = redact(value, redact_fields);
    let text = redacted.to_string();
    if text.len() <= max_bytes {
        return redacted;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    serde_json::json!({
        "truncated": true,
        "original_bytes": text.len(),
        "preview": &text[..cut],
    })
}
