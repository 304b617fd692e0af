//! op-tools: Method and Tool registries
//!
//! Provides the callable abstraction, the two registries populated by an
//! explicit bootstrap routine, the compatibility validator that checks a tool
//! against the method it wraps, and argument preparation used at dispatch time.

pub mod arguments;
pub mod compat;
pub mod method;
pub mod registry;
pub mod tool;

// Re-export main types
pub use arguments::{prepare_arguments, PreparedArguments};
pub use compat::{
    CompatibilityIssue, CompatibilityReport, CompatibilityValidator, IssueCategory,
    ValidationSummary,
};
pub use method::{Classification, MethodDefinition, SecurityLevel};
pub use registry::{Definition, MethodRegistry, Registries, Registry, RegistryStats, Target, ToolRegistry};
pub use tool::{
    async_handler, handler_fn, AuditPolicy, BoxedHandler, BusinessRules, Handler, ResourcePolicy,
    SessionEffect, SessionPolicy, ToolDefinition,
};
