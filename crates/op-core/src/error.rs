//! Error types for op-dispatch

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Serialized error kind carried in the outbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RegistrationConflict,
    NotFound,
    SchemaIncompatible,
    PolicyViolation,
    SessionStateError,
    ExecutionFailure,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RegistrationConflict => "RegistrationConflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::SchemaIncompatible => "SchemaIncompatible",
            ErrorKind::PolicyViolation => "PolicyViolation",
            ErrorKind::SessionStateError => "SessionStateError",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which business rule or session policy rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolationKind {
    /// Target is registered but disabled
    Disabled,
    /// Target requires an authenticated actor
    Unauthenticated,
    /// Actor lacks a required permission or does not own the session
    Forbidden,
    /// Resource is missing or in a state the target does not accept
    ResourceState,
    /// Target requires an active session and none was resolved
    SessionRequired,
    /// Target forbids creating the requested session
    SessionForbidden,
    /// Arguments failed validation against the declared parameters
    InvalidParameters,
    /// Correlation id already completed but its result was not kept for replay
    ResultNotRetained,
}

impl fmt::Display for PolicyViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyViolationKind::Disabled => "disabled",
            PolicyViolationKind::Unauthenticated => "unauthenticated",
            PolicyViolationKind::Forbidden => "forbidden",
            PolicyViolationKind::ResourceState => "resource_state",
            PolicyViolationKind::SessionRequired => "session_required",
            PolicyViolationKind::SessionForbidden => "session_forbidden",
            PolicyViolationKind::InvalidParameters => "invalid_parameters",
            PolicyViolationKind::ResultNotRetained => "result_not_retained",
        };
        f.write_str(s)
    }
}

/// Main error type for op-dispatch operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} '{key}' is already registered")]
    RegistrationConflict { kind: &'static str, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema incompatible: {0}")]
    SchemaIncompatible(String),

    #[error("Policy violation ({kind}): {message}")]
    PolicyViolation {
        kind: PolicyViolationKind,
        message: String,
    },

    #[error("Session state error: {0}")]
    SessionState(String),

    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a registration conflict error
    pub fn conflict(kind: &'static str, key: impl Into<String>) -> Self {
        Error::RegistrationConflict {
            kind,
            key: key.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a policy violation error
    pub fn policy(kind: PolicyViolationKind, msg: impl Into<String>) -> Self {
        Error::PolicyViolation {
            kind,
            message: msg.into(),
        }
    }

    /// Create a session state error
    pub fn session_state(msg: impl Into<String>) -> Self {
        Error::SessionState(msg.into())
    }

    /// Create an execution failure error
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::ExecutionFailure(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Kind reported to callers. Infrastructure errors surface as execution failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RegistrationConflict { .. } => ErrorKind::RegistrationConflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::SchemaIncompatible(_) => ErrorKind::SchemaIncompatible,
            Error::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Error::SessionState(_) => ErrorKind::SessionStateError,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ExecutionFailure(_)
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Store(_) => ErrorKind::ExecutionFailure,
        }
    }

    /// Policy sub-kind, if this is a policy violation
    pub fn policy_kind(&self) -> Option<PolicyViolationKind> {
        match self {
            Error::PolicyViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the message may be shown to the caller verbatim
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Error::RegistrationConflict { .. }
                | Error::NotFound(_)
                | Error::SchemaIncompatible(_)
                | Error::PolicyViolation { .. }
                | Error::SessionState(_)
                | Error::Timeout(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::ExecutionFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::session_state("closed").kind(),
            ErrorKind::SessionStateError
        );
        assert_eq!(Error::store("disk full").kind(), ErrorKind::ExecutionFailure);
        assert_eq!(Error::Timeout(10).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_public_messages() {
        assert!(Error::policy(PolicyViolationKind::Disabled, "off").is_public());
        assert!(!Error::execution("db password=hunter2").is_public());
        assert!(!Error::store("connection refused").is_public());
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::SessionStateError).unwrap();
        assert_eq!(json, "\"SessionStateError\"");
        let json = serde_json::to_string(&PolicyViolationKind::ResourceState).unwrap();
        assert_eq!(json, "\"resource_state\"");
    }
}
