//! Request Orchestrator
//!
//! Drives one inbound envelope through
//! `RECEIVED -> CONTEXT_BUILT -> POLICY_CHECKED -> DISPATCHED -> COMPLETED | FAILED`
//! and records exactly one audit event per request.
//!
//! Every step before DISPATCHED fails without touching the callable. Business
//! rules run in a fixed order (enabled, permission, resource state) and stop
//! at the first failure. Failures raised by the callable are logged with their
//! full text and returned to the caller with a sanitized message.

use futures::FutureExt;
use op_core::audit::snapshot;
use op_core::{
    AuditEvent, Error, ErrorBody, ErrorKind, ExecutionContext, InboundEnvelope, Outcome,
    OutboundEnvelope, ParameterDescriptor, PolicyViolationKind, Result, SessionStatus, Settings,
};
use op_execution_tracker::{DispatchHook, DispatchPhase, DispatchTracker};
use op_state_store::{StateStore, StateStoreError};
use op_tools::{
    prepare_arguments, AuditPolicy, BoxedHandler, CompatibilityValidator, MethodDefinition,
    Registries, SessionEffect, SessionPolicy, Target, ToolDefinition, ValidationSummary,
};
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{AllowAll, Authorizer, InMemoryResourceStates, ResourceGuard};
use crate::session::SessionManager;

/// Dispatches inbound envelopes against the registries
pub struct Orchestrator {
    registries: Arc<Registries>,
    store: Arc<dyn StateStore>,
    sessions: SessionManager,
    authorizer: Arc<dyn Authorizer>,
    resources: Arc<dyn ResourceGuard>,
    hooks: Vec<Arc<dyn DispatchHook>>,
    tracker: DispatchTracker,
    settings: Settings,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    registries: Arc<Registries>,
    store: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
    resources: Arc<dyn ResourceGuard>,
    hooks: Vec<Arc<dyn DispatchHook>>,
    tracker: DispatchTracker,
    settings: Settings,
}

impl OrchestratorBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn resource_guard(mut self, resources: Arc<dyn ResourceGuard>) -> Self {
        self.resources = resources;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn tracker(mut self, tracker: DispatchTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn build(self) -> Orchestrator {
        info!(
            hooks = self.hooks.len(),
            default_timeout_ms = self.settings.dispatch.default_timeout_ms,
            max_timeout_ms = self.settings.dispatch.max_timeout_ms,
            "Orchestrator ready"
        );
        Orchestrator {
            sessions: SessionManager::new(self.store.clone()),
            registries: self.registries,
            store: self.store,
            authorizer: self.authorizer,
            resources: self.resources,
            hooks: self.hooks,
            tracker: self.tracker,
            settings: self.settings,
        }
    }
}

/// Tool, method and session policy of a resolved target
struct Policies<'a> {
    tool: Option<&'a ToolDefinition>,
    method: Option<&'a MethodDefinition>,
    session: SessionPolicy,
}

impl Orchestrator {
    pub fn builder(registries: Arc<Registries>, store: Arc<dyn StateStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registries,
            store,
            authorizer: Arc::new(AllowAll),
            resources: Arc::new(InMemoryResourceStates::new()),
            hooks: Vec::new(),
            tracker: DispatchTracker::new(),
            settings: Settings::default(),
        }
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn tracker(&self) -> &DispatchTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the compatibility validator over every registered tool
    pub fn validate(&self) -> ValidationSummary {
        CompatibilityValidator::from_settings(&self.settings.dispatch).validate_all(&self.registries)
    }

    /// Dispatch a top-level request
    pub async fn dispatch(&self, envelope: InboundEnvelope) -> OutboundEnvelope {
        self.run(envelope, None).await
    }

    /// Dispatch a call made from inside a running operation.
    ///
    /// The child inherits actor, session, resource and metadata from `parent`,
    /// gets a fresh correlation id and runs one level deeper. When it stays in
    /// the parent's session it runs under the parent's lease.
    pub async fn dispatch_nested(
        &self,
        parent: &ExecutionContext,
        operation: impl Into<String>,
        parameters: Value,
    ) -> OutboundEnvelope {
        let mut envelope = InboundEnvelope::new(operation, parent.actor_id.clone(), parameters);
        envelope.session_id = parent.session_id.clone();
        envelope.resource_id = parent.resource_id.clone();
        envelope.metadata = parent.metadata.clone();
        self.run(envelope, Some(parent)).await
    }

    #[instrument(skip_all, fields(
        correlation_id = %envelope.correlation_id,
        operation = %envelope.operation,
        actor_id = %envelope.actor_id
    ))]
    async fn run(
        &self,
        envelope: InboundEnvelope,
        parent: Option<&ExecutionContext>,
    ) -> OutboundEnvelope {
        let started = Instant::now();

        let mut ctx = match parent {
            Some(parent) => parent.child(&envelope.operation, &envelope.correlation_id),
            None => ExecutionContext::from_envelope(&envelope, None),
        };

        let request_id = self.tracker.begin(&ctx).await;
        self.run_before_hooks(&ctx).await;

        if let Some(response) = self.replay(&envelope).await {
            self.finish_phase(&request_id, &response).await;
            self.run_after_hooks(&ctx, &response, started.elapsed()).await;
            return response;
        }

        let mut audit_policy = AuditPolicy::default();
        let result = match self
            .check_depth(&ctx)
            .and_then(|_| self.registries.resolve(&envelope.operation))
        {
            Ok(target) => {
                if let Some(tool) = target.tool() {
                    audit_policy = tool.audit_policy.clone();
                }
                self.process(&target, &envelope, parent, &mut ctx).await
            }
            Err(err) => Err(err),
        };

        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        let request_snapshot = self.request_snapshot(&envelope.parameters, &audit_policy);

        let (mut response, event) = match result {
            Ok(value) => {
                let response_snapshot = if audit_policy.capture_response {
                    snapshot(
                        &value,
                        &self.redact_fields(&audit_policy),
                        self.settings.audit.max_snapshot_bytes,
                    )
                } else {
                    Value::Null
                };
                let complete = audit_policy.capture_response && response_snapshot == value;
                let event = AuditEvent::from_context(
                    &ctx,
                    request_snapshot,
                    response_snapshot,
                    Outcome::Completed,
                    None,
                    duration_ms,
                )
                .with_complete_response(complete);
                (OutboundEnvelope::completed(&envelope.correlation_id, value), event)
            }
            Err(err) => {
                self.log_failure(&ctx, &err);
                let body = ErrorBody::from_error(&err, format!("operation '{}' failed", ctx.operation));
                let event = AuditEvent::from_context(
                    &ctx,
                    request_snapshot,
                    json!({ "error": &body }),
                    Outcome::Failed,
                    Some(body.kind),
                    duration_ms,
                );
                (OutboundEnvelope::failed(&envelope.correlation_id, body), event)
            }
        };

        match self.store.append(event).await {
            Ok(recorded) => {
                debug!(audit_event_id = %recorded.id, sequence = recorded.sequence, "Audit event recorded");
                response.audit_event_id = Some(recorded.id);
            }
            Err(StateStoreError::DuplicateCorrelation(_)) => {
                // A concurrent attempt with the same correlation id won the append
                match self.replay(&envelope).await {
                    Some(replayed) if !replayed.is_result_withheld() => response = replayed,
                    Some(replayed) => response.audit_event_id = replayed.audit_event_id,
                    None => {}
                }
            }
            Err(err) => {
                error!(error = %err, "Failed to record audit event");
            }
        }

        self.finish_phase(&request_id, &response).await;
        info!(
            outcome = %response.outcome,
            session_id = ?ctx.session_id,
            duration_ms,
            "Request finished"
        );
        self.run_after_hooks(&ctx, &response, elapsed).await;
        response
    }

    /// Everything between RECEIVED and the callable's return value
    async fn process(
        &self,
        target: &Target,
        envelope: &InboundEnvelope,
        parent: Option<&ExecutionContext>,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let policies = match target {
            Target::Tool { tool, method } => Policies {
                tool: Some(tool.as_ref()),
                method: method.as_deref(),
                session: tool.session_policy.clone(),
            },
            Target::Method(method) => Policies {
                tool: None,
                method: Some(method.as_ref()),
                session: SessionPolicy::default(),
            },
        };

        let resolved = self.sessions.resolve(envelope, &policies.session).await?;

        let seed = ctx.clone();
        *ctx = ExecutionContext::from_envelope(envelope, resolved.existing.as_ref());
        ctx.request_id = seed.request_id;
        ctx.parent_correlation_id = seed.parent_correlation_id;
        ctx.depth = seed.depth;
        ctx.dry_run = seed.dry_run;
        ctx.created_at = seed.created_at;
        self.advance(&ctx.request_id, DispatchPhase::ContextBuilt).await;

        if let Some(tool) = policies.tool {
            self.check_rules(tool, ctx).await?;
        }

        let parameters: &[ParameterDescriptor] = match (policies.tool, policies.method) {
            (Some(tool), _) => tool.parameters.as_slice(),
            (None, Some(method)) => method.input_schema.as_slice(),
            (None, None) => &[],
        };
        let prepared = prepare_arguments(
            parameters,
            &envelope.parameters,
            &self.settings.dispatch.control_parameters,
        )?;
        let timeout_ms = self.timeout_for(policies.tool, prepared.timeout_ms()?);
        ctx.dry_run |= prepared.dry_run();
        self.advance(&ctx.request_id, DispatchPhase::PolicyChecked).await;

        if ctx.dry_run {
            debug!("Dry run, callable not invoked");
            return Ok(json!({
                "dry_run": true,
                "operation": ctx.operation,
                "arguments": prepared.into_value(),
            }));
        }

        if let Some(candidate) = resolved.pending {
            let session = self.sessions.materialize(candidate).await?;
            ctx.session_id = Some(session.id);
        }

        let handler = Self::handler_for(&policies)?;

        // A nested call in its parent's session runs under the parent's lease
        let inherited =
            parent.is_some_and(|p| p.session_id.is_some() && p.session_id == ctx.session_id);
        let lease = match &ctx.session_id {
            Some(session_id) if !inherited => Some(self.sessions.acquire(session_id).await?),
            _ => None,
        };

        self.advance(&ctx.request_id, DispatchPhase::Dispatched).await;
        let result = Self::invoke(handler, ctx.clone(), prepared.into_value(), timeout_ms).await;

        match lease {
            Some(lease) => {
                let effect = match &result {
                    Ok(_) => policies.session.on_success,
                    Err(_) => policies.session.failure_effect(lease.kind()),
                };
                let session_id = lease.session_id().to_string();
                if let Err(e) = self.sessions.release(lease, effect).await {
                    warn!(session_id = %session_id, error = %e, "Failed to apply session effect");
                }
            }
            None => {
                if let (Ok(_), Some(session_id)) = (&result, &ctx.session_id) {
                    self.apply_session_effect(policies.session.on_success, session_id).await;
                }
            }
        }
        result
    }

    fn check_depth(&self, ctx: &ExecutionContext) -> Result<()> {
        if ctx.depth > self.settings.dispatch.max_depth {
            return Err(Error::policy(
                PolicyViolationKind::Forbidden,
                format!(
                    "nested dispatch depth {} exceeds the limit of {}",
                    ctx.depth, self.settings.dispatch.max_depth
                ),
            ));
        }
        Ok(())
    }

    /// Enabled, then permission, then resource state
    async fn check_rules(&self, tool: &ToolDefinition, ctx: &ExecutionContext) -> Result<()> {
        let rules = &tool.rules;
        if !rules.enabled {
            return Err(Error::policy(
                PolicyViolationKind::Disabled,
                format!("tool '{}' is disabled", tool.name),
            ));
        }

        if rules.requires_auth || !rules.required_permissions.is_empty() {
            if !self.authorizer.is_authenticated(&ctx.actor_id).await {
                return Err(Error::policy(
                    PolicyViolationKind::Unauthenticated,
                    format!("tool '{}' requires an authenticated actor", tool.name),
                ));
            }
            for permission in &rules.required_permissions {
                if !self.authorizer.has_permission(&ctx.actor_id, permission).await {
                    return Err(Error::policy(
                        PolicyViolationKind::Forbidden,
                        format!(
                            "actor '{}' lacks permission '{}' for tool '{}'",
                            ctx.actor_id, permission, tool.name
                        ),
                    ));
                }
            }
        }

        let policy = &tool.resource_policy;
        match &ctx.resource_id {
            None if policy.requires_resource => Err(Error::policy(
                PolicyViolationKind::ResourceState,
                format!("tool '{}' requires a resource", tool.name),
            )),
            Some(resource_id) if !policy.allowed_states.is_empty() => {
                match self.resources.state_of(resource_id).await {
                    Some(state) if policy.allowed_states.contains(&state) => Ok(()),
                    Some(state) => Err(Error::policy(
                        PolicyViolationKind::ResourceState,
                        format!(
                            "resource '{}' is '{}', tool '{}' accepts {:?}",
                            resource_id, state, tool.name, policy.allowed_states
                        ),
                    )),
                    None => Err(Error::policy(
                        PolicyViolationKind::ResourceState,
                        format!("resource '{}' is unknown", resource_id),
                    )),
                }
            }
            _ => Ok(()),
        }
    }

    /// Caller override or tool rule or default, capped at the maximum
    fn timeout_for(&self, tool: Option<&ToolDefinition>, requested: Option<u64>) -> u64 {
        let dispatch = &self.settings.dispatch;
        requested
            .or_else(|| tool.and_then(|t| t.rules.timeout_ms))
            .unwrap_or(dispatch.default_timeout_ms)
            .min(dispatch.max_timeout_ms)
    }

    fn handler_for(policies: &Policies<'_>) -> Result<BoxedHandler> {
        policies
            .tool
            .and_then(|t| t.handler.clone())
            .or_else(|| policies.method.map(|m| m.handler().clone()))
            .ok_or_else(|| Error::not_found("no callable bound to the requested operation"))
    }

    async fn invoke(
        handler: BoxedHandler,
        ctx: ExecutionContext,
        arguments: Value,
        timeout_ms: u64,
    ) -> Result<Value> {
        let call = AssertUnwindSafe(handler.call(ctx, arguments)).catch_unwind();

        match timeout(Duration::from_millis(timeout_ms), call).await {
            Err(_) => Err(Error::Timeout(timeout_ms)),
            Ok(Err(panic)) => Err(Error::execution(format!(
                "callable panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(Err(err))) => Err(match err.downcast::<Error>() {
                Ok(err) => err,
                Err(err) => Error::execution(format!("{:#}", err)),
            }),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    /// Apply an effect to a session leased by an enclosing call.
    /// Failures leave the response as is.
    async fn apply_session_effect(&self, effect: SessionEffect, session_id: &str) {
        let next = match effect {
            SessionEffect::None => return,
            SessionEffect::Complete => SessionStatus::Completed,
            SessionEffect::Fail => SessionStatus::Failed,
            SessionEffect::Close => SessionStatus::Closed,
        };
        if let Err(e) = self.sessions.transition(session_id, next).await {
            warn!(session_id = %session_id, error = %e, "Failed to apply session effect");
        }
    }

    /// Serve a resubmitted correlation id from the ledger
    async fn replay(&self, envelope: &InboundEnvelope) -> Option<OutboundEnvelope> {
        let event = match self.store.event_by_correlation(&envelope.correlation_id).await {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Ledger lookup failed, dispatching normally");
                return None;
            }
        };

        if event.actor_id != envelope.actor_id {
            return Some(OutboundEnvelope::failed(
                &envelope.correlation_id,
                ErrorBody {
                    kind: ErrorKind::PolicyViolation,
                    sub_kind: Some(PolicyViolationKind::Forbidden),
                    message: "correlation id already used by another actor".to_string(),
                },
            ));
        }

        info!(audit_event_id = %event.id, outcome = %event.outcome, "Replaying recorded outcome");
        let mut response = match event.outcome {
            Outcome::Completed if event.response_complete => {
                OutboundEnvelope::completed(&envelope.correlation_id, event.response_snapshot)
            }
            Outcome::Completed => {
                warn!(
                    audit_event_id = %event.id,
                    "Recorded result is redacted or truncated, not replaying it"
                );
                OutboundEnvelope::failed(
                    &envelope.correlation_id,
                    ErrorBody {
                        kind: ErrorKind::PolicyViolation,
                        sub_kind: Some(PolicyViolationKind::ResultNotRetained),
                        message: format!(
                            "correlation id '{}' already completed and its result was not retained",
                            envelope.correlation_id
                        ),
                    },
                )
            }
            Outcome::Failed => {
                let body = event
                    .response_snapshot
                    .get("error")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<ErrorBody>(v).ok())
                    .unwrap_or_else(|| ErrorBody {
                        kind: event.error_kind.unwrap_or(ErrorKind::ExecutionFailure),
                        sub_kind: None,
                        message: format!("operation '{}' failed", event.operation_name),
                    });
                OutboundEnvelope::failed(&envelope.correlation_id, body)
            }
        };
        response.audit_event_id = Some(event.id);
        response.replayed = true;
        Some(response)
    }

    fn redact_fields(&self, policy: &AuditPolicy) -> Vec<String> {
        let mut fields = self.settings.audit.redact_fields.clone();
        fields.extend(policy.redact_fields.iter().cloned());
        fields
    }

    fn request_snapshot(&self, parameters: &Value, policy: &AuditPolicy) -> Value {
        if !policy.capture_request {
            return Value::Null;
        }
        snapshot(
            parameters,
            &self.redact_fields(policy),
            self.settings.audit.max_snapshot_bytes,
        )
    }

    fn log_failure(&self, ctx: &ExecutionContext, err: &Error) {
        match err.kind() {
            ErrorKind::ExecutionFailure => error!(
                request_id = %ctx.request_id,
                error = %err,
                "Operation failed"
            ),
            ErrorKind::Timeout => warn!(request_id = %ctx.request_id, error = %err, "Operation timed out"),
            _ => info!(request_id = %ctx.request_id, error = %err, "Request rejected"),
        }
    }

    async fn advance(&self, request_id: &str, phase: DispatchPhase) {
        if let Err(e) = self.tracker.advance(request_id, phase).await {
            debug!(error = %e, "Phase change not recorded");
        }
    }

    async fn finish_phase(&self, request_id: &str, response: &OutboundEnvelope) {
        let phase = if response.is_completed() {
            DispatchPhase::Completed
        } else {
            DispatchPhase::Failed
        };
        self.advance(request_id, phase).await;
    }

    async fn run_before_hooks(&self, ctx: &ExecutionContext) {
        for hook in &self.hooks {
            if let Err(e) = hook.before(ctx).await {
                warn!(hook = hook.name(), error = %e, "Dispatch hook failed");
            }
        }
    }

    async fn run_after_hooks(
        &self,
        ctx: &ExecutionContext,
        response: &OutboundEnvelope,
        elapsed: Duration,
    ) {
        for hook in &self.hooks {
            if let Err(e) = hook.after(ctx, response, elapsed).await {
                warn!(hook = hook.name(), error = %e, "Dispatch hook failed");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_state_store::MemoryStore;
    use op_tools::{handler_fn, BusinessRules, MethodDefinition, ResourcePolicy};

    fn registries() -> Arc<Registries> {
        Registries::bootstrap(|r| {
            r.register_method(MethodDefinition::new(
                "widget.ping",
                handler_fn(|_, _| Ok(json!("pong"))),
            ))?;
            r.register_tool(ToolDefinition::new("ping", "widget.ping"))?;
            r.register_tool(
                ToolDefinition::new("ping_disabled", "widget.ping").rules(BusinessRules {
                    enabled: false,
                    requires_auth: true,
                    ..BusinessRules::default()
                }),
            )?;
            r.register_tool(
                ToolDefinition::new("ping_resource", "widget.ping").resource_policy(ResourcePolicy {
                    requires_resource: true,
                    allowed_states: vec!["ready".to_string()],
                }),
            )?;
            Ok(())
        })
        .unwrap()
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder(registries(), Arc::new(MemoryStore::new())).build()
    }

    #[test]
    fn test_timeout_selection() {
        let orch = orchestrator();
        let tool = ToolDefinition::new("t", "m").rules(BusinessRules {
            timeout_ms: Some(1_000),
            ..BusinessRules::default()
        });

        assert_eq!(orch.timeout_for(None, None), 30_000);
        assert_eq!(orch.timeout_for(Some(&tool), None), 1_000);
        assert_eq!(orch.timeout_for(Some(&tool), Some(50)), 50);
        assert_eq!(orch.timeout_for(None, Some(10_000_000)), 300_000);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_disabled_checked_before_auth() {
        let response = orchestrator()
            .dispatch(InboundEnvelope::new("ping_disabled", "alice", json!({})))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.sub_kind, Some(PolicyViolationKind::Disabled));
    }

    #[tokio::test]
    async fn test_resource_rules() {
        let states = Arc::new(InMemoryResourceStates::new());
        let orch = Orchestrator::builder(registries(), Arc::new(MemoryStore::new()))
            .resource_guard(states.clone())
            .build();

        let missing = orch
            .dispatch(InboundEnvelope::new("ping_resource", "alice", json!({})))
            .await;
        assert_eq!(missing.error.unwrap().sub_kind, Some(PolicyViolationKind::ResourceState));

        states.set("w-1", "draft").await;
        let wrong_state = orch
            .dispatch(InboundEnvelope::new("ping_resource", "alice", json!({})).on_resource("w-1"))
            .await;
        assert_eq!(wrong_state.error.unwrap().sub_kind, Some(PolicyViolationKind::ResourceState));

        states.set("w-1", "ready").await;
        let ok = orch
            .dispatch(InboundEnvelope::new("ping_resource", "alice", json!({})).on_resource("w-1"))
            .await;
        assert!(ok.is_completed());
    }

    #[tokio::test]
    async fn test_methods_dispatch_directly() {
        let response = orchestrator()
            .dispatch(InboundEnvelope::new("widget.ping", "alice", json!({})))
            .await;
        assert_eq!(response.result, Some(json!("pong")));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_audited() {
        let orch = orchestrator();
        let response = orch
            .dispatch(InboundEnvelope::new("widget.nope", "alice", json!({})))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));

        let event = orch
            .store()
            .event_by_correlation(&response.correlation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.outcome, Outcome::Failed);
        assert_eq!(event.error_kind, Some(ErrorKind::NotFound));
        assert_eq!(response.audit_event_id, Some(event.id));
    }
}
