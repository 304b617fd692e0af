use crate::error::Result;
use async_trait::async_trait;
use op_core::{AuditEvent, Session};

/// Persistence interface consumed by the orchestrator
///
/// The audit ledger is append-only. Appends may run concurrently; the store
/// assigns each event a ledger sequence, which totally orders the events of
/// any one session.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Append an event and return it with its assigned sequence.
    ///
    /// A second event with an already-recorded correlation id is rejected with
    /// `DuplicateCorrelation` and nothing is written.
    async fn append(&self, event: AuditEvent) -> Result<AuditEvent>;

    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    async fn upsert(&self, session: &Session) -> Result<()>;

    /// Return the existing session matching `candidate`, or insert it.
    ///
    /// Resource-bound candidates match the live (non-terminal) resource-bound
    /// session for the same resource; others match by id. Concurrent callers
    /// with equivalent candidates all get the same single winner.
    async fn find_or_create(&self, candidate: Session) -> Result<Session>;

    /// Events of one session in sequence order
    async fn events_for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>>;

    async fn event_by_correlation(&self, correlation_id: &str) -> Result<Option<AuditEvent>>;

    /// Sessions owned by an actor, oldest first
    async fn sessions_for_actor(&self, actor_id: &str) -> Result<Vec<Session>>;

    /// Most recent events across all sessions, newest first
    async fn recent_events(&self, limit: usize) -> Result<Vec<AuditEvent>>;
}
