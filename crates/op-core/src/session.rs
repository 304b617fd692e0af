//! Session model and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Session kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Long-lived, actor-driven session
    Conversational,
    /// Created lazily the first time an operation runs against a resource
    ResourceBound,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Conversational => "conversational",
            SessionKind::ResourceBound => "resource_bound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversational" => Some(SessionKind::Conversational),
            "resource_bound" => Some(SessionKind::ResourceBound),
            _ => None,
        }
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Executing,
    Completed,
    Failed,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Executing => "executing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "executing" => Some(SessionStatus::Executing),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }

    /// Terminal sessions accept no further operations
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Closed
        )
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Active, Executing) | (Executing, Active) => true,
            (Active | Executing, Completed | Failed | Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actor-owned unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Bound resource, set for resource-bound sessions
    pub resource_id: Option<String>,
    /// Values inherited by execution contexts built in this session
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new active session
    pub fn new(owner_id: impl Into<String>, kind: SessionKind) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), owner_id, kind)
    }

    pub fn with_id(id: impl Into<String>, owner_id: impl Into<String>, kind: SessionKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            kind,
            status: SessionStatus::Active,
            resource_id: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an active resource-bound session
    pub fn for_resource(owner_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let mut session = Self::new(owner_id, SessionKind::ResourceBound);
        session.resource_id = Some(resource_id.into());
        session
    }

    /// Fail explicitly if this session cannot accept another operation
    pub fn ensure_accepts_operations(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::session_state(format!(
                "session '{}' is {} and accepts no further operations",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Move to a new status, rejecting illegal transitions
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::session_state(format!(
                "session '{}' cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new("alice", SessionKind::Conversational);
        assert_eq!(session.status, SessionStatus::Active);

        session.transition(SessionStatus::Executing).unwrap();
        session.transition(SessionStatus::Active).unwrap();
        session.transition(SessionStatus::Closed).unwrap();
        assert!(session.status.is_terminal());
    }

    #[test]
    fn test_closed_session_rejects_everything() {
        let mut session = Session::new("alice", SessionKind::Conversational);
        session.transition(SessionStatus::Closed).unwrap();

        let err = session.ensure_accepts_operations().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionStateError);

        let err = session.transition(SessionStatus::Active).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionStateError);
    }

    #[test]
    fn test_resource_session() {
        let session = Session::for_resource("bob", "widget-7");
        assert_eq!(session.kind, SessionKind::ResourceBound);
        assert_eq!(session.resource_id.as_deref(), Some("widget-7"));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Executing,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Closed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }
}
