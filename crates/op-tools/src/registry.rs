//! Method and Tool registries
//!
//! Registration runs once, single-threaded, during bootstrap and needs
//! `&mut`. Once bootstrap hands back `Arc<Registries>` nothing can register
//! any more, so concurrent readers need no locking.

use op_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::method::MethodDefinition;
use crate::tool::ToolDefinition;

/// A registrable record with a unique key
pub trait Definition: Send + Sync {
    /// Human-readable kind used in conflict and lookup errors
    const KIND: &'static str;

    fn key(&self) -> &str;
}

impl Definition for MethodDefinition {
    const KIND: &'static str = "method";

    fn key(&self) -> &str {
        &self.qualified_name
    }
}

impl Definition for ToolDefinition {
    const KIND: &'static str = "tool";

    fn key(&self) -> &str {
        &self.name
    }
}

/// Map from unique key to definition, iterated in registration order
pub struct Registry<D: Definition> {
    entries: HashMap<Arc<str>, Arc<D>>,
    order: Vec<Arc<str>>,
}

impl<D: Definition> Registry<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert a definition. A duplicate key fails and keeps the first entry.
    pub fn register(&mut self, definition: D) -> Result<Arc<D>> {
        let key: Arc<str> = Arc::from(definition.key());
        if self.entries.contains_key(&key) {
            return Err(Error::conflict(D::KIND, key.as_ref()));
        }

        let definition = Arc::new(definition);
        self.entries.insert(key.clone(), definition.clone());
        self.order.push(key.clone());

        debug!("Registered {}: {}", D::KIND, key);
        Ok(definition)
    }

    /// Look up by key
    pub fn lookup(&self, name: &str) -> Result<Arc<D>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{} '{}' is not registered", D::KIND, name)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<D>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Definitions matching `predicate`, in registration order
    pub fn list<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Arc<D>> + 'a
    where
        P: Fn(&D) -> bool + 'a,
    {
        self.iter().filter(move |d| predicate(d))
    }

    /// All definitions in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<D>> + '_ {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<D: Definition> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

pub type MethodRegistry = Registry<MethodDefinition>;
pub type ToolRegistry = Registry<ToolDefinition>;

/// Statistics about the registries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub methods: usize,
    pub tools: usize,
    pub tools_with_own_handler: usize,
    pub disabled_tools: usize,
}

/// What a dispatched name resolved to
#[derive(Debug, Clone)]
pub enum Target {
    Tool {
        tool: Arc<ToolDefinition>,
        /// None only when the tool has its own handler
        method: Option<Arc<MethodDefinition>>,
    },
    Method(Arc<MethodDefinition>),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Tool { tool, .. } => &tool.name,
            Target::Method(method) => &method.qualified_name,
        }
    }

    pub fn tool(&self) -> Option<&Arc<ToolDefinition>> {
        match self {
            Target::Tool { tool, .. } => Some(tool),
            Target::Method(_) => None,
        }
    }
}

/// The injected registry object handed to the validator and orchestrator
#[derive(Default)]
pub struct Registries {
    pub methods: MethodRegistry,
    pub tools: ToolRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an explicit registration routine and freeze the result
    pub fn bootstrap<F>(register: F) -> Result<Arc<Self>>
    where
        F: FnOnce(&mut Registries) -> Result<()>,
    {
        let mut registries = Registries::new();
        register(&mut registries)?;

        let stats = registries.stats();
        info!(
            methods = stats.methods,
            tools = stats.tools,
            "Registries bootstrapped"
        );
        Ok(Arc::new(registries))
    }

    pub fn register_method(&mut self, method: MethodDefinition) -> Result<Arc<MethodDefinition>> {
        self.methods.register(method)
    }

    pub fn register_tool(&mut self, tool: ToolDefinition) -> Result<Arc<ToolDefinition>> {
        self.tools.register(tool)
    }

    /// Resolve a dispatched name. Tools shadow methods of the same name.
    pub fn resolve(&self, name: &str) -> Result<Target> {
        if let Some(tool) = self.tools.get(name) {
            let method = self.methods.get(&tool.method).cloned();
            if method.is_none() && tool.handler.is_none() {
                return Err(Error::not_found(format!(
                    "tool '{}' references unregistered method '{}'",
                    tool.name, tool.method
                )));
            }
            return Ok(Target::Tool {
                tool: tool.clone(),
                method,
            });
        }

        self.methods
            .get(name)
            .cloned()
            .map(Target::Method)
            .ok_or_else(|| Error::not_found(format!("no tool or method named '{}'", name)))
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            methods: self.methods.len(),
            tools: self.tools.len(),
            tools_with_own_handler: self.tools.iter().filter(|t| t.handler.is_some()).count(),
            disabled_tools: self.tools.iter().filter(|t| !t.rules.enabled).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::handler_fn;
    use op_core::ErrorKind;
    use serde_json::json;

    fn method(name: &str, marker: &'static str) -> MethodDefinition {
        MethodDefinition::new(name, handler_fn(move |_, _| Ok(json!(marker))))
            .describe(marker)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = MethodRegistry::new();
        registry.register(method("widget.create", "first")).unwrap();

        let found = registry.lookup("widget.create").unwrap();
        assert_eq!(found.qualified_name, "widget.create");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_is_conflict_and_first_wins() {
        let mut registry = MethodRegistry::new();
        registry.register(method("widget.create", "first")).unwrap();

        let err = registry
            .register(method("widget.create", "second"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistrationConflict);
        assert_eq!(registry.lookup("widget.create").unwrap().description, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = ToolRegistry::new();
        let err = registry.lookup("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_with_predicate_keeps_order() {
        let mut registry = MethodRegistry::new();
        for name in ["b.one", "a.two", "b.three"] {
            registry.register(method(name, "m")).unwrap();
        }
        let names: Vec<_> = registry
            .list(|m| m.qualified_name.starts_with("b."))
            .map(|m| m.qualified_name.clone())
            .collect();
        assert_eq!(names, vec!["b.one", "b.three"]);
    }

    #[test]
    fn test_resolve_targets() {
        let registries = Registries::bootstrap(|r| {
            r.register_method(method("widget.create", "m"))?;
            r.register_tool(ToolDefinition::new("create_widget_tool", "widget.create"))?;
            r.register_tool(ToolDefinition::new("orphan_tool", "widget.missing"))?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            registries.resolve("create_widget_tool").unwrap(),
            Target::Tool { method: Some(_), .. }
        ));
        assert!(matches!(
            registries.resolve("widget.create").unwrap(),
            Target::Method(_)
        ));
        assert_eq!(
            registries.resolve("orphan_tool").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            registries.resolve("unknown").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_bootstrap_propagates_conflict() {
        let result = Registries::bootstrap(|r| {
            r.register_tool(ToolDefinition::new("t", "m"))?;
            r.register_tool(ToolDefinition::new("t", "m"))?;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(Error::RegistrationConflict { kind: "tool", .. })
        ));
    }
}
