//! Inbound and outbound request envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::audit::Outcome;
use crate::error::{Error, ErrorKind, PolicyViolationKind};

/// Request handed over by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Tool name or qualified method name
    #[serde(alias = "operation_or_tool_name")]
    pub operation: String,
    pub actor_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default = "new_correlation_id")]
    pub correlation_id: String,
    /// Caller-supplied correlation metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

impl InboundEnvelope {
    pub fn new(operation: impl Into<String>, actor_id: impl Into<String>, parameters: Value) -> Self {
        Self {
            operation: operation.into(),
            actor_id: actor_id.into(),
            session_id: None,
            resource_id: None,
            parameters,
            correlation_id: new_correlation_id(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn on_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Error payload of a failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_kind: Option<PolicyViolationKind>,
    pub message: String,
}

impl ErrorBody {
    /// Build a body whose message is safe to return.
    ///
    /// Non-public errors are replaced with `fallback`.
    pub fn from_error(err: &Error, fallback: impl Into<String>) -> Self {
        let message = if err.is_public() {
            err.to_string()
        } else {
            fallback.into()
        };
        Self {
            kind: err.kind(),
            sub_kind: err.policy_kind(),
            message,
        }
    }
}

/// Response returned to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub correlation_id: String,
    pub outcome: Outcome,
    pub result: Option<Value>,
    pub error: Option<ErrorBody>,
    /// None only when the ledger could not record the event
    pub audit_event_id: Option<String>,
    /// Set when the response was served from an earlier audited attempt
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl OutboundEnvelope {
    pub fn completed(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Completed,
            result: Some(result),
            error: None,
            audit_event_id: None,
            replayed: false,
        }
    }

    pub fn failed(correlation_id: impl Into<String>, error: ErrorBody) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Failed,
            result: None,
            error: Some(error),
            audit_event_id: None,
            replayed: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Replay of a completed request whose result the ledger did not keep
    pub fn is_result_withheld(&self) -> bool {
        self.error.as_ref().and_then(|e| e.sub_kind) == Some(PolicyViolationKind::ResultNotRetained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_defaults() {
        let env: InboundEnvelope = serde_json::from_value(json!({
            "operation_or_tool_name": "widget.create",
            "actor_id": "alice"
        }))
        .unwrap();
        assert_eq!(env.operation, "widget.create");
        assert!(env.parameters.is_object());
        assert!(!env.correlation_id.is_empty());
    }

    #[test]
    fn test_error_body_sanitizes() {
        let body = ErrorBody::from_error(
            &Error::execution("stack trace: /srv/app.rs:42"),
            "operation failed",
        );
        assert_eq!(body.kind, ErrorKind::ExecutionFailure);
        assert_eq!(body.message, "operation failed");

        let body = ErrorBody::from_error(&Error::session_state("session closed"), "unused");
        assert_eq!(body.kind, ErrorKind::SessionStateError);
        assert!(body.message.contains("session closed"));
    }

    #[test]
    fn test_outbound_shape() {
        let env = OutboundEnvelope::completed("c-1", json!({"id": 1}));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["outcome"], "COMPLETED");
        assert!(v["error"].is_null());
        assert!(v.get("replayed").is_none());
    }
}
