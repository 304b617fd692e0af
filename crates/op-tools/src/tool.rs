//! Callables and Tool Definitions
//!
//! A [`Handler`] is the opaque callable behind a method or tool. A
//! [`ToolDefinition`] is the caller-facing record that wraps exactly one
//! method by name and carries the policies the orchestrator enforces.

use anyhow::Result;
use async_trait::async_trait;
use op_core::{ExecutionContext, ParameterDescriptor, SessionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Core trait for all callables
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run with validated arguments. The context is an owned copy.
    async fn call(&self, ctx: ExecutionContext, params: Value) -> Result<Value>;
}

/// Type alias for shared handlers
pub type BoxedHandler = Arc<dyn Handler>;

/// Handler backed by a synchronous closure
#[derive(Clone)]
pub struct FnHandler {
    handler: Arc<dyn Fn(ExecutionContext, Value) -> Result<Value> + Send + Sync>,
}

#[async_trait]
impl Handler for FnHandler {
    async fn call(&self, ctx: ExecutionContext, params: Value) -> Result<Value> {
        (self.handler)(ctx, params)
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> BoxedHandler
where
    F: Fn(ExecutionContext, Value) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        handler: Arc::new(f),
    })
}

/// Handler backed by an async closure
pub struct AsyncFnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for AsyncFnHandler<F>
where
    F: Fn(ExecutionContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, ctx: ExecutionContext, params: Value) -> Result<Value> {
        (self.f)(ctx, params).await
    }
}

/// Wrap an async closure as a handler
pub fn async_handler<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(ExecutionContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(AsyncFnHandler { f })
}

/// Business rules checked before dispatch, in order: enabled, permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessRules {
    pub enabled: bool,
    pub requires_auth: bool,
    pub required_permissions: Vec<String>,
    /// Per-tool timeout, capped by the orchestrator maximum
    pub timeout_ms: Option<u64>,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            enabled: true,
            requires_auth: false,
            required_permissions: Vec::new(),
            timeout_ms: None,
        }
    }
}

/// Session transition applied once a call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEffect {
    /// Back to `active`
    #[default]
    None,
    Complete,
    Fail,
    Close,
}

/// How a target relates to sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Fail unless an active session is resolved
    pub requires_active: bool,
    /// Allow creating a conversational session for an unknown session id
    pub allow_create: bool,
    /// Find-or-create a resource-bound session when none is supplied
    pub resource_bound: bool,
    pub on_success: SessionEffect,
    /// Effect after a failed call. `None` on a resource-bound session fails it.
    pub on_failure: SessionEffect,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            requires_active: false,
            allow_create: true,
            resource_bound: false,
            on_success: SessionEffect::None,
            on_failure: SessionEffect::None,
        }
    }
}

impl SessionPolicy {
    /// Effect to apply after a failed call in a session of `kind`
    pub fn failure_effect(&self, kind: SessionKind) -> SessionEffect {
        match (self.on_failure, kind) {
            (SessionEffect::None, SessionKind::ResourceBound) => SessionEffect::Fail,
            (effect, _) => effect,
        }
    }
}

/// Resource requirements checked after permissions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    pub requires_resource: bool,
    /// Accepted resource states; empty accepts any state
    pub allowed_states: Vec<String>,
}

/// What goes into the audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditPolicy {
    pub capture_request: bool,
    pub capture_response: bool,
    /// Extra field names to redact on top of the global list
    pub redact_fields: Vec<String>,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            capture_request: true,
            capture_response: true,
            redact_fields: Vec::new(),
        }
    }
}

/// Caller-facing operation wrapping one Method Definition by name
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    /// Qualified name of the wrapped method, resolved lazily
    pub method: String,
    #[serde(default)]
    pub rules: BusinessRules,
    #[serde(default)]
    pub session_policy: SessionPolicy,
    #[serde(default)]
    pub resource_policy: ResourcePolicy,
    #[serde(default)]
    pub audit_policy: AuditPolicy,
    /// Own callable; when absent the referenced method's callable runs
    #[serde(skip)]
    pub handler: Option<BoxedHandler>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            method: method.into(),
            rules: BusinessRules::default(),
            session_policy: SessionPolicy::default(),
            resource_policy: ResourcePolicy::default(),
            audit_policy: AuditPolicy::default(),
            handler: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn rules(mut self, rules: BusinessRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    pub fn resource_policy(mut self, policy: ResourcePolicy) -> Self {
        self.resource_policy = policy;
        self
    }

    pub fn audit_policy(mut self, policy: AuditPolicy) -> Self {
        self.audit_policy = policy;
        self
    }

    pub fn handler(mut self, handler: BoxedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("parameters", &self.parameters)
            .field("rules", &self.rules)
            .field("session_policy", &self.session_policy)
            .field("resource_policy", &self.resource_policy)
            .field("audit_policy", &self.audit_policy)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_effect_defaults_by_session_kind() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.failure_effect(SessionKind::ResourceBound), SessionEffect::Fail);
        assert_eq!(policy.failure_effect(SessionKind::Conversational), SessionEffect::None);

        let closing = SessionPolicy {
            on_failure: SessionEffect::Close,
            ..SessionPolicy::default()
        };
        assert_eq!(closing.failure_effect(SessionKind::ResourceBound), SessionEffect::Close);
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = handler_fn(|_ctx, input| Ok(input));
        let ctx = ExecutionContext::new("alice", "echo");
        let result = handler.call(ctx, json!({"msg": "hello"})).await.unwrap();
        assert_eq!(result, json!({"msg": "hello"}));
    }

    #[tokio::test]
    async fn test_async_handler_sees_context() {
        let handler = async_handler(|ctx: ExecutionContext, _input| async move {
            Ok(json!({"actor": ctx.actor_id}))
        });
        let ctx = ExecutionContext::new("bob", "whoami");
        let result = handler.call(ctx, json!({})).await.unwrap();
        assert_eq!(result, json!({"actor": "bob"}));
    }

    #[test]
    fn test_tool_from_manifest() {
        let tool: ToolDefinition = serde_json::from_value(json!({
            "name": "create_widget_tool",
            "method": "widget.create",
            "parameters": [
                {"name": "title", "declared_type": "str", "required": true}
            ],
            "rules": {"required_permissions": ["widget:write"]}
        }))
        .unwrap();

        assert!(tool.rules.enabled);
        assert_eq!(tool.rules.required_permissions, vec!["widget:write"]);
        assert!(tool.session_policy.allow_create);
        assert!(tool.handler.is_none());
        assert_eq!(
            tool.parameter("title").unwrap().declared_type,
            op_core::ParamType::String
        );
    }
}
