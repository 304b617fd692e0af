//! Session resolution for inbound requests
//!
//! Resolution happens before any business rule runs and never creates
//! anything. A session that still has to be created is returned as a pending
//! candidate and only materialized once the request is about to run the
//! callable.
//!
//! While a callable runs, its request holds the session's lease and the
//! session is `executing`. Other requests on the same session wait for the
//! lease, so a session only ever changes under the request that holds it.

use op_core::{
    Error, InboundEnvelope, PolicyViolationKind, Result, Session, SessionKind, SessionStatus,
};
use op_state_store::StateStore;
use op_tools::{SessionEffect, SessionPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Outcome of resolving the session named (or implied) by a request
#[derive(Debug, Clone, Default)]
pub struct ResolvedSession {
    /// Session that already exists and accepts operations
    pub existing: Option<Session>,
    /// Session to create right before dispatch
    pub pending: Option<Session>,
}

impl ResolvedSession {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Exclusive hold on a session while one request runs its callable
#[derive(Debug)]
pub struct SessionLease {
    session_id: String,
    kind: SessionKind,
    guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }
}

/// Session lookups, lazy creation and lifecycle transitions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn StateStore>,
    leases: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve the session for `envelope` under `policy`
    pub async fn resolve(
        &self,
        envelope: &InboundEnvelope,
        policy: &SessionPolicy,
    ) -> Result<ResolvedSession> {
        if let Some(session_id) = &envelope.session_id {
            return match self.store.get(session_id).await? {
                Some(session) => {
                    session.ensure_accepts_operations()?;
                    if session.kind == SessionKind::Conversational
                        && session.owner_id != envelope.actor_id
                    {
                        return Err(Error::policy(
                            PolicyViolationKind::Forbidden,
                            format!("session '{}' belongs to another actor", session_id),
                        ));
                    }
                    Ok(ResolvedSession {
                        existing: Some(session),
                        pending: None,
                    })
                }
                None if policy.requires_active => Err(Error::policy(
                    PolicyViolationKind::SessionRequired,
                    format!(
                        "'{}' requires an active session and '{}' does not exist",
                        envelope.operation, session_id
                    ),
                )),
                None if policy.allow_create => Ok(ResolvedSession {
                    existing: None,
                    pending: Some(Session::with_id(
                        session_id.clone(),
                        envelope.actor_id.clone(),
                        SessionKind::Conversational,
                    )),
                }),
                None => Err(Error::policy(
                    PolicyViolationKind::SessionForbidden,
                    format!(
                        "'{}' does not allow creating session '{}'",
                        envelope.operation, session_id
                    ),
                )),
            };
        }

        if policy.resource_bound {
            if let Some(resource_id) = &envelope.resource_id {
                return Ok(ResolvedSession {
                    existing: None,
                    pending: Some(Session::for_resource(
                        envelope.actor_id.clone(),
                        resource_id.clone(),
                    )),
                });
            }
        }

        if policy.requires_active {
            return Err(Error::policy(
                PolicyViolationKind::SessionRequired,
                format!("'{}' requires an active session", envelope.operation),
            ));
        }

        Ok(ResolvedSession::none())
    }

    /// Create a pending session, or join the one a concurrent request created
    pub async fn materialize(&self, candidate: Session) -> Result<Session> {
        let requested_owner = candidate.owner_id.clone();
        let session = self.store.find_or_create(candidate).await?;

        session.ensure_accepts_operations()?;
        if session.kind == SessionKind::Conversational && session.owner_id != requested_owner {
            return Err(Error::policy(
                PolicyViolationKind::Forbidden,
                format!("session '{}' belongs to another actor", session.id),
            ));
        }

        debug!(session_id = %session.id, kind = session.kind.as_str(), "Session materialized");
        Ok(session)
    }

    /// Open a new active session
    pub async fn open(&self, owner_id: &str, kind: SessionKind) -> Result<Session> {
        let session = Session::new(owner_id, kind);
        self.store.upsert(&session).await?;
        info!(session_id = %session.id, owner_id = %owner_id, "Session opened");
        Ok(session)
    }

    /// Apply a validated status transition and persist it
    pub async fn transition(&self, session_id: &str, next: SessionStatus) -> Result<Session> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("session '{}'", session_id)))?;

        let previous = session.status;
        session.transition(next)?;
        self.store.upsert(&session).await?;

        info!(session_id = %session_id, from = %previous, to = %next, "Session transitioned");
        Ok(session)
    }

    /// Wait for exclusive use of `session_id` and mark it executing
    pub async fn acquire(&self, session_id: &str) -> Result<SessionLease> {
        let slot = {
            let mut leases = self.leases.lock().await;
            leases.entry(session_id.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;

        match self.mark_executing(session_id).await {
            Ok(session) => {
                debug!(session_id = %session_id, "Session lease acquired");
                Ok(SessionLease {
                    session_id: session_id.to_string(),
                    kind: session.kind,
                    guard,
                })
            }
            Err(e) => {
                drop(guard);
                self.forget_slot(session_id).await;
                Err(e)
            }
        }
    }

    async fn mark_executing(&self, session_id: &str) -> Result<Session> {
        let mut session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("session '{}'", session_id)))?;
        session.ensure_accepts_operations()?;

        if session.status == SessionStatus::Executing {
            // Nobody holds the lease, so the previous holder was dropped mid-call
            warn!(session_id = %session_id, "Reclaiming session left executing");
            return Ok(session);
        }
        session.transition(SessionStatus::Executing)?;
        self.store.upsert(&session).await?;
        Ok(session)
    }

    /// Apply `effect` to a leased session and give the lease up
    pub async fn release(&self, lease: SessionLease, effect: SessionEffect) -> Result<Session> {
        let next = match effect {
            SessionEffect::None => SessionStatus::Active,
            SessionEffect::Complete => SessionStatus::Completed,
            SessionEffect::Fail => SessionStatus::Failed,
            SessionEffect::Close => SessionStatus::Closed,
        };
        let result = self.transition(&lease.session_id, next).await;

        let SessionLease {
            session_id, guard, ..
        } = lease;
        drop(guard);
        self.forget_slot(&session_id).await;
        result
    }

    /// Drop the lease slot once nobody holds or waits for it
    async fn forget_slot(&self, session_id: &str) {
        let mut leases = self.leases.lock().await;
        if leases
            .get(session_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            leases.remove(session_id);
        }
    }

    pub async fn close(&self, session_id: &str) -> Result<Session> {
        self.transition(session_id, SessionStatus::Closed).await
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.store.get(session_id).await?)
    }
}
