//! In-process state store
//!
//! A single lock guards the ledger, the session table and the correlation
//! index, so an append and its duplicate check happen atomically.

use crate::error::{Result, StateStoreError};
use crate::metrics;
use crate::state_store::StateStore;
use async_trait::async_trait;
use op_core::{AuditEvent, Session, SessionKind};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    events: Vec<AuditEvent>,
    by_correlation: HashMap<String, usize>,
    sessions: HashMap<String, Session>,
    /// Live resource-bound session per resource id
    by_resource: HashMap<String, String>,
}

impl Inner {
    fn live_resource_session(&self, resource_id: &str) -> Option<&Session> {
        self.by_resource
            .get(resource_id)
            .and_then(|id| self.sessions.get(id))
            .filter(|s| !s.status.is_terminal())
    }

    fn index_session(&mut self, session: &Session) {
        if session.kind != SessionKind::ResourceBound {
            return;
        }
        if let Some(resource_id) = &session.resource_id {
            if session.status.is_terminal() {
                if self.by_resource.get(resource_id) == Some(&session.id) {
                    self.by_resource.remove(resource_id);
                }
            } else {
                self.by_resource.insert(resource_id.clone(), session.id.clone());
            }
        }
    }
}

/// State store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn append(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        let _timer = metrics::OperationTimer::new("append", "memory");
        let mut inner = self.inner.write().await;

        if inner.by_correlation.contains_key(&event.correlation_id) {
            return Err(StateStoreError::DuplicateCorrelation(event.correlation_id));
        }

        event.sequence = inner.events.len() as u64 + 1;
        let index = inner.events.len();
        inner.by_correlation.insert(event.correlation_id.clone(), index);
        inner.events.push(event.clone());

        metrics::record_audit_event(event.outcome.as_str());
        debug!(sequence = event.sequence, correlation_id = %event.correlation_id, "Appended audit event");
        Ok(event)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(session_id).cloned())
    }

    async fn upsert(&self, session: &Session) -> Result<()> {
        let _timer = metrics::OperationTimer::new("upsert", "memory");
        let mut inner = self.inner.write().await;
        inner.index_session(session);
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_or_create(&self, candidate: Session) -> Result<Session> {
        let _timer = metrics::OperationTimer::new("find_or_create", "memory");
        let mut inner = self.inner.write().await;

        let existing = match (&candidate.kind, &candidate.resource_id) {
            (SessionKind::ResourceBound, Some(resource_id)) => inner.live_resource_session(resource_id),
            _ => inner.sessions.get(&candidate.id),
        };
        if let Some(session) = existing {
            return Ok(session.clone());
        }

        inner.index_session(&candidate);
        inner.sessions.insert(candidate.id.clone(), candidate.clone());
        metrics::record_session_created(candidate.kind.as_str());
        debug!(session_id = %candidate.id, kind = candidate.kind.as_str(), "Created session");
        Ok(candidate)
    }

    async fn events_for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn event_by_correlation(&self, correlation_id: &str) -> Result<Option<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_correlation
            .get(correlation_id)
            .and_then(|i| inner.events.get(*i))
            .cloned())
    }

    async fn sessions_for_actor(&self, actor_id: &str) -> Result<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.owner_id == actor_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{ExecutionContext, Outcome, SessionStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn event(session: &str, correlation: &str) -> AuditEvent {
        let mut ctx = ExecutionContext::new("alice", "widget.create").with_session(session);
        ctx.correlation_id = correlation.to_string();
        AuditEvent::from_context(&ctx, json!({}), json!({}), Outcome::Completed, None, 1)
    }

    #[tokio::test]
    async fn test_append_assigns_sequence_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let first = store.append(event("s1", "c1")).await.unwrap();
        let second = store.append(event("s1", "c2")).await.unwrap();
        assert!(second.sequence > first.sequence);

        let err = store.append(event("s1", "c1")).await.unwrap_err();
        assert!(matches!(err, StateStoreError::DuplicateCorrelation(_)));
        assert_eq!(store.events_for_session("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(event("s1", &format!("c{}", i))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = store.events_for_session("s1").await.unwrap();
        assert_eq!(events.len(), 50);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn test_resource_session_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|actor| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .find_or_create(Session::for_resource(actor, "widget-7"))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_closed_resource_session_is_replaced() {
        let store = MemoryStore::new();
        let mut first = store
            .find_or_create(Session::for_resource("alice", "widget-7"))
            .await
            .unwrap();
        first.transition(SessionStatus::Closed).unwrap();
        store.upsert(&first).await.unwrap();

        let second = store
            .find_or_create(Session::for_resource("alice", "widget-7"))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.sessions_for_actor("alice").await.unwrap().len(), 2);
    }
}
