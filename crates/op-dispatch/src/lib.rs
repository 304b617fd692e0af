//! op-dispatch: Request Orchestrator
//!
//! Resolves an inbound envelope to a registered tool or method, builds the
//! execution context, enforces session policy and business rules, runs the
//! callable under a timeout and appends one audit event per request.
//!
//! ```rust,ignore
//! let registries = Registries::bootstrap(register_catalog)?;
//! let store = op_state_store::open(&settings.store.url).await?;
//! let orchestrator = Orchestrator::builder(registries, store)
//!     .settings(settings)
//!     .hook(Arc::new(DispatchTelemetry::new("op-dispatch")))
//!     .build();
//!
//! let response = orchestrator
//!     .dispatch(InboundEnvelope::new("create_widget_tool", "alice", json!({"title": "x"})))
//!     .await;
//! ```

pub mod auth;
pub mod orchestrator;
pub mod session;

pub use auth::{AllowAll, Authorizer, InMemoryResourceStates, ResourceGuard, StaticAuthorizer};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use session::{ResolvedSession, SessionLease, SessionManager};
