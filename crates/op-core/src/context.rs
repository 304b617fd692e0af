//! Per-request execution context
//!
//! Built once per request from the inbound envelope and the resolved session,
//! then passed by value through the call chain. Nothing in here refers back to
//! live session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::envelope::InboundEnvelope;
use crate::session::Session;

/// Execution context for one dispatched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique id for this request attempt
    pub request_id: String,

    /// Caller-supplied correlation id
    pub correlation_id: String,

    /// Correlation id of the enclosing call, for nested dispatch
    pub parent_correlation_id: Option<String>,

    /// Acting principal
    pub actor_id: String,

    /// Session the request runs in, if any
    pub session_id: Option<String>,

    /// Resource the request targets, if any
    pub resource_id: Option<String>,

    /// Operation or tool name being dispatched
    pub operation: String,

    /// Nesting depth, zero for top-level requests
    pub depth: u32,

    /// Set when the caller asked for a dry run
    pub dry_run: bool,

    /// Correlation metadata (session values overridden by caller values)
    pub metadata: BTreeMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a bare context for an actor and operation
    pub fn new(actor_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            parent_correlation_id: None,
            actor_id: actor_id.into(),
            session_id: None,
            resource_id: None,
            operation: operation.into(),
            depth: 0,
            dry_run: false,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Merge the envelope with an inherited session.
    ///
    /// Explicit envelope fields win over session fields. Session fields are
    /// cloned, so mutating the session afterwards cannot reach this context.
    pub fn from_envelope(envelope: &InboundEnvelope, session: Option<&Session>) -> Self {
        let mut metadata = session
            .map(|s| s.metadata.clone())
            .unwrap_or_default();
        metadata.extend(envelope.metadata.clone());

        let session_id = envelope
            .session_id
            .clone()
            .or_else(|| session.map(|s| s.id.clone()));
        let resource_id = envelope
            .resource_id
            .clone()
            .or_else(|| session.and_then(|s| s.resource_id.clone()));

        Self {
            request_id: Uuid::new_v4().to_string(),
            correlation_id: envelope.correlation_id.clone(),
            parent_correlation_id: None,
            actor_id: envelope.actor_id.clone(),
            session_id,
            resource_id,
            operation: envelope.operation.clone(),
            depth: 0,
            dry_run: false,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Create a child context for a nested call.
    ///
    /// Actor, session, resource and metadata are copied from the parent.
    pub fn child(&self, operation: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.into(),
            parent_correlation_id: Some(self.correlation_id.clone()),
            actor_id: self.actor_id.clone(),
            session_id: self.session_id.clone(),
            resource_id: self.resource_id.clone(),
            operation: operation.into(),
            depth: self.depth + 1,
            dry_run: self.dry_run,
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}
