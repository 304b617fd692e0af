use chrono::{DateTime, Utc};
use op_core::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one dispatched request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchPhase {
    /// Envelope accepted, target and session being resolved
    Received,

    /// Execution context merged from envelope and session
    ContextBuilt,

    /// Business rules and arguments passed
    PolicyChecked,

    /// Callable invoked
    Dispatched,

    /// Request finished successfully
    Completed,

    /// Request finished with an error
    Failed,
}

impl DispatchPhase {
    fn rank(&self) -> u8 {
        match self {
            DispatchPhase::Received => 0,
            DispatchPhase::ContextBuilt => 1,
            DispatchPhase::PolicyChecked => 2,
            DispatchPhase::Dispatched => 3,
            DispatchPhase::Completed | DispatchPhase::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchPhase::Completed | DispatchPhase::Failed)
    }

    /// Phases only move forward. Either terminal phase may follow any
    /// non-terminal one, since a request can fail or be answered early at
    /// every step.
    pub fn can_advance_to(&self, next: DispatchPhase) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPhase::Received => write!(f, "RECEIVED"),
            DispatchPhase::ContextBuilt => write!(f, "CONTEXT_BUILT"),
            DispatchPhase::PolicyChecked => write!(f, "POLICY_CHECKED"),
            DispatchPhase::Dispatched => write!(f, "DISPATCHED"),
            DispatchPhase::Completed => write!(f, "COMPLETED"),
            DispatchPhase::Failed => write!(f, "FAILED"),
        }
    }
}

/// Tracked request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub request_id: String,
    pub correlation_id: String,

    /// Correlation id of the enclosing call (if this is a nested dispatch)
    pub parent_correlation_id: Option<String>,

    pub operation: String,
    pub phase: DispatchPhase,

    /// Phases visited, in order
    pub history: Vec<DispatchPhase>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn new(ctx: &ExecutionContext) -> Self {
        let now = Utc::now();
        Self {
            request_id: ctx.request_id.clone(),
            correlation_id: ctx.correlation_id.clone(),
            parent_correlation_id: ctx.parent_correlation_id.clone(),
            operation: ctx.operation.clone(),
            phase: DispatchPhase::Received,
            history: vec![DispatchPhase::Received],
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, returning false for a backwards or post-terminal move
    pub fn advance(&mut self, next: DispatchPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            return false;
        }
        self.phase = next;
        self.history.push(next);
        self.updated_at = Utc::now();
        true
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.updated_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let ctx = ExecutionContext::new("alice", "widget.create");
        let mut record = DispatchRecord::new(&ctx);

        assert!(record.advance(DispatchPhase::ContextBuilt));
        assert!(!record.advance(DispatchPhase::Received));
        assert!(record.advance(DispatchPhase::PolicyChecked));
        assert!(record.advance(DispatchPhase::Failed));
        assert!(!record.advance(DispatchPhase::Completed));
        assert_eq!(
            record.history,
            vec![
                DispatchPhase::Received,
                DispatchPhase::ContextBuilt,
                DispatchPhase::PolicyChecked,
                DispatchPhase::Failed
            ]
        );
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_value(DispatchPhase::PolicyChecked).unwrap();
        assert_eq!(json, serde_json::json!("POLICY_CHECKED"));
        assert_eq!(DispatchPhase::PolicyChecked.to_string(), "POLICY_CHECKED");
    }
}
