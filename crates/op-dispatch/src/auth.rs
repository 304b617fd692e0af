//! Authorization and resource-state hook points
//!
//! The orchestrator only decides *when* these run (enabled, then permission,
//! then resource state). What an actor may do and what state a resource is in
//! are answered by whatever implementation is plugged in.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

// ============================================================================
// AUTHORIZATION
// ============================================================================

/// Identity and permission checks
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authenticated(&self, actor_id: &str) -> bool;

    async fn has_permission(&self, actor_id: &str, permission: &str) -> bool;
}

/// Accepts every actor and grants every permission
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn is_authenticated(&self, _actor_id: &str) -> bool {
        true
    }

    async fn has_permission(&self, _actor_id: &str, _permission: &str) -> bool {
        true
    }
}

/// Grants a fixed permission set per known actor
///
/// Unknown actors are unauthenticated. The permission `*` grants everything.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    grants: HashMap<String, HashSet<String>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor with permissions
    pub fn grant<I, S>(mut self, actor_id: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants
            .entry(actor_id.into())
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_authenticated(&self, actor_id: &str) -> bool {
        self.grants.contains_key(actor_id)
    }

    async fn has_permission(&self, actor_id: &str, permission: &str) -> bool {
        self.grants
            .get(actor_id)
            .is_some_and(|p| p.contains(permission) || p.contains("*"))
    }
}

// ============================================================================
// RESOURCE STATE
// ============================================================================

/// Reports the current state of a resource
#[async_trait]
pub trait ResourceGuard: Send + Sync {
    /// None when the resource is unknown
    async fn state_of(&self, resource_id: &str) -> Option<String>;
}

/// Resource states held in memory
#[derive(Debug, Default)]
pub struct InMemoryResourceStates {
    states: RwLock<HashMap<String, String>>,
}

impl InMemoryResourceStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, resource_id: impl Into<String>, state: impl Into<String>) {
        let resource_id = resource_id.into();
        let state = state.into();
        debug!(resource_id = %resource_id, state = %state, "Resource state set");
        self.states.write().await.insert(resource_id, state);
    }

    pub async fn remove(&self, resource_id: &str) {
        self.states.write().await.remove(resource_id);
    }
}

#[async_trait]
impl ResourceGuard for InMemoryResourceStates {
    async fn state_of(&self, resource_id: &str) -> Option<String> {
        self.states.read().await.get(resource_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_authorizer() {
        let auth = StaticAuthorizer::new()
            .grant("alice", ["widget:write"])
            .grant("root", ["*"]);

        assert!(auth.is_authenticated("alice").await);
        assert!(!auth.is_authenticated("mallory").await);
        assert!(auth.has_permission("alice", "widget:write").await);
        assert!(!auth.has_permission("alice", "widget:delete").await);
        assert!(auth.has_permission("root", "widget:delete").await);
    }

    #[tokio::test]
    async fn test_resource_states() {
        let states = InMemoryResourceStates::new();
        states.set("widget-1", "draft").await;
        assert_eq!(states.state_of("widget-1").await.as_deref(), Some("draft"));
        states.remove("widget-1").await;
        assert!(states.state_of("widget-1").await.is_none());
    }
}
