//! Widget catalog
//!
//! The finished method and tool definitions this service ships with, and the
//! bootstrap routine that registers them. Nothing is registered as a side
//! effect of this module being compiled in; `bootstrap` has to be called.

use anyhow::{Context, Result};
use op_core::{Constraints, Error, ExecutionContext, ParamType, ParameterDescriptor};
use op_dispatch::InMemoryResourceStates;
use op_introspection::{FieldSpec, InputModel, ModelSpec, TypeExpr};
use op_tools::{
    async_handler, BusinessRules, Classification, MethodDefinition, Registries, ResourcePolicy,
    SecurityLevel, SessionEffect, SessionPolicy, ToolDefinition,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub const COLORS: [&str; 3] = ["red", "green", "blue"];

const ACTIVE: &str = "active";
const ARCHIVED: &str = "archived";

// ============================================================================
// INPUT MODELS
// ============================================================================

struct CreateWidget;

impl InputModel for CreateWidget {
    fn model_spec() -> ModelSpec {
        ModelSpec::new("CreateWidget")
            .field(
                FieldSpec::new("title", TypeExpr::named("str"))
                    .constrained(Constraints::default().length(Some(1), Some(200))),
            )
            .field(FieldSpec::new(
                "color",
                TypeExpr::parse("Optional[Literal['red', 'green', 'blue']]"),
            ))
            .field(FieldSpec::new("tags", TypeExpr::parse("Optional[list[str]]")))
    }
}

struct WidgetRef;

impl InputModel for WidgetRef {
    fn model_spec() -> ModelSpec {
        ModelSpec::new("WidgetRef").field(FieldSpec::new("widget_id", TypeExpr::named("str")))
    }
}

struct ArchiveWidget;

impl InputModel for ArchiveWidget {
    fn model_spec() -> ModelSpec {
        ModelSpec::new("ArchiveWidget")
            .extends(WidgetRef::model_spec())
            .field(FieldSpec::new("reason", TypeExpr::parse("str | None")))
    }
}

// ============================================================================
// WIDGET BACKEND
// ============================================================================

/// In-process widget backend the catalog's callables operate on
#[derive(Clone, Default)]
pub struct Widgets {
    items: Arc<RwLock<BTreeMap<String, Value>>>,
    states: Arc<InMemoryResourceStates>,
}

impl Widgets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource states, shared with the orchestrator's resource guard
    pub fn states(&self) -> Arc<InMemoryResourceStates> {
        self.states.clone()
    }

    async fn create(&self, ctx: ExecutionContext, input: Value) -> Result<Value> {
        let id = format!("widget-{}", Uuid::new_v4().simple());
        let widget = json!({
            "id": id,
            "title": input["title"],
            "color": input.get("color").cloned().unwrap_or(Value::Null),
            "tags": input.get("tags").cloned().unwrap_or_else(|| json!([])),
            "owner": ctx.actor_id,
            "state": ACTIVE,
        });

        self.items.write().await.insert(id.clone(), widget.clone());
        self.states.set(id.as_str(), ACTIVE).await;
        info!(widget_id = %id, actor_id = %ctx.actor_id, "Widget created");
        Ok(widget)
    }

    async fn get(&self, input: Value) -> Result<Value> {
        let id = widget_id(&input)?;
        self.items
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("widget '{}'", id)).into())
    }

    async fn archive(&self, ctx: ExecutionContext, input: Value) -> Result<Value> {
        let id = widget_id(&input)?;
        let mut items = self.items.write().await;
        let widget = items
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("widget '{}'", id)))?;

        widget["state"] = json!(ARCHIVED);
        widget["archived_by"] = json!(ctx.actor_id);
        if let Some(reason) = input.get("reason").filter(|r| !r.is_null()) {
            widget["archive_reason"] = reason.clone();
        }
        let archived = widget.clone();
        drop(items);

        self.states.set(id, ARCHIVED).await;
        info!(widget_id = %id, actor_id = %ctx.actor_id, "Widget archived");
        Ok(archived)
    }

    async fn list(&self, input: Value) -> Result<Value> {
        let owner = input.get("owner").and_then(Value::as_str);
        let items = self.items.read().await;
        let widgets: Vec<&Value> = items
            .values()
            .filter(|w| owner.map_or(true, |o| w["owner"] == o))
            .collect();
        Ok(json!(widgets))
    }
}

fn widget_id(input: &Value) -> Result<&str> {
    input
        .get("widget_id")
        .and_then(Value::as_str)
        .context("widget_id is missing")
}

/// Bind a `Widgets` operation as an async handler
fn bind<F, Fut>(widgets: &Widgets, op: F) -> op_tools::BoxedHandler
where
    F: Fn(Widgets, ExecutionContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let widgets = widgets.clone();
    async_handler(move |ctx, input| op(widgets.clone(), ctx, input))
}

// ============================================================================
// BOOTSTRAP
// ============================================================================

/// Register every widget method and tool
pub fn register(registries: &mut Registries, widgets: &Widgets) -> op_core::Result<()> {
    let write = Classification::new("widgets", SecurityLevel::Modify);
    let read = Classification::new("widgets", SecurityLevel::ReadOnly);

    registries.register_method(
        MethodDefinition::from_model::<CreateWidget>(
            "widget.create",
            bind(widgets, |w, ctx, input| async move { w.create(ctx, input).await }),
        )
        .describe("Create a widget")
        .classified(write.clone()),
    )?;
    registries.register_method(
        MethodDefinition::from_model::<WidgetRef>(
            "widget.get",
            bind(widgets, |w, _, input| async move { w.get(input).await }),
        )
        .describe("Fetch one widget")
        .classified(read.clone()),
    )?;
    registries.register_method(
        MethodDefinition::from_model::<ArchiveWidget>(
            "widget.archive",
            bind(widgets, |w, ctx, input| async move { w.archive(ctx, input).await }),
        )
        .describe("Archive a widget")
        .classified(Classification::new("widgets", SecurityLevel::Elevated).tagged("lifecycle")),
    )?;
    registries.register_method(
        MethodDefinition::new(
            "widget.list",
            bind(widgets, |w, _, input| async move { w.list(input).await }),
        )
        .with_json_input(&json!({ "type": "object", "additionalProperties": true }))
        .describe("List widgets")
        .classified(read),
    )?;

    registries.register_tool(
        ToolDefinition::new("create_widget_tool", "widget.create")
            .describe("Create a widget with a title and optional color")
            .param(
                ParameterDescriptor::required("title", "string")
                    .constrained(Constraints::default().length(Some(1), Some(120)))
                    .describe("Display title"),
            )
            .param(
                ParameterDescriptor::optional("color", "enum")
                    .constrained(Constraints::default().one_of(vec![json!("red"), json!("blue")])),
            )
            .param(ParameterDescriptor::optional("tags", "list").items(ParamType::String)),
    )?;
    registries.register_tool(
        ToolDefinition::new("get_widget_tool", "widget.get")
            .describe("Fetch a widget by id")
            .param(ParameterDescriptor::required("widget_id", "str")),
    )?;
    registries.register_tool(
        ToolDefinition::new("archive_widget_tool", "widget.archive")
            .describe("Archive an active widget")
            .param(ParameterDescriptor::required("widget_id", "str"))
            .param(ParameterDescriptor::optional("reason", "text"))
            .rules(BusinessRules {
                requires_auth: true,
                required_permissions: vec!["widget:archive".to_string()],
                ..BusinessRules::default()
            })
            .resource_policy(ResourcePolicy {
                requires_resource: true,
                allowed_states: vec![ACTIVE.to_string()],
            })
            .session_policy(SessionPolicy {
                resource_bound: true,
                on_success: SessionEffect::Complete,
                ..SessionPolicy::default()
            }),
    )?;
    registries.register_tool(
        ToolDefinition::new("list_widgets_tool", "widget.list")
            .describe("List widgets, optionally by owner")
            .param(ParameterDescriptor::optional("owner", "string")),
    )?;

    Ok(())
}

/// Build and freeze the registries for this service
pub fn bootstrap(widgets: &Widgets) -> op_core::Result<Arc<Registries>> {
    Registries::bootstrap(|registries| register(registries, widgets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{ErrorKind, InboundEnvelope, PolicyViolationKind, SessionStatus};
    use op_dispatch::Orchestrator;
    use op_state_store::{MemoryStore, StateStore};
    use op_tools::{CompatibilityValidator, IssueCategory};

    fn orchestrator(widgets: &Widgets) -> (Orchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::builder(bootstrap(widgets).unwrap(), store.clone())
            .resource_guard(widgets.states())
            .build();
        (orch, store)
    }

    #[test]
    fn test_catalog_has_no_errors() {
        let registries = bootstrap(&Widgets::new()).unwrap();
        let summary = CompatibilityValidator::default().validate_all(&registries);

        assert_eq!(summary.error_count, 0, "{:?}", summary.reports);
        assert!(summary.passes(false));

        // widget.list takes an opaque schema
        let list = summary
            .reports
            .iter()
            .find(|r| r.tool_name == "list_widgets_tool")
            .unwrap();
        assert_eq!(list.warnings[0].category, IssueCategory::EmptyMethodSchema);
        assert!(!summary.passes(true));
    }

    #[test]
    fn test_bootstrap_twice_into_one_registry_conflicts() {
        let widgets = Widgets::new();
        let mut registries = Registries::new();
        register(&mut registries, &widgets).unwrap();
        let err = register(&mut registries, &widgets).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistrationConflict);
    }

    #[tokio::test]
    async fn test_create_then_archive() {
        let widgets = Widgets::new();
        let (orch, store) = orchestrator(&widgets);

        let created = orch
            .dispatch(InboundEnvelope::new(
                "create_widget_tool",
                "alice",
                json!({"title": "Sprocket", "color": "red", "tags": ["a"]}),
            ))
            .await;
        assert!(created.is_completed());
        let id = created.result.unwrap()["id"].as_str().unwrap().to_string();

        let archive = || {
            InboundEnvelope::new(
                "archive_widget_tool",
                "alice",
                json!({"widget_id": id, "reason": "done"}),
            )
            .on_resource(id.as_str())
        };

        let archived = orch.dispatch(archive()).await;
        assert!(archived.is_completed(), "{:?}", archived.error);
        assert_eq!(archived.result.as_ref().unwrap()["state"], ARCHIVED);

        let event = store
            .event_by_correlation(&archived.correlation_id)
            .await
            .unwrap()
            .unwrap();
        let session = store.get(event.session_id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(session.resource_id.as_deref(), Some(id.as_str()));
        assert_eq!(session.status, SessionStatus::Completed);

        let again = orch.dispatch(archive()).await;
        assert_eq!(
            again.error.unwrap().sub_kind,
            Some(PolicyViolationKind::ResourceState)
        );
    }

    #[tokio::test]
    async fn test_unknown_widget_is_not_found() {
        let widgets = Widgets::new();
        let (orch, _) = orchestrator(&widgets);

        let response = orch
            .dispatch(InboundEnvelope::new(
                "get_widget_tool",
                "alice",
                json!({"widget_id": "widget-missing"}),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.kind, ErrorKind::NotFound);
        assert!(error.message.contains("widget-missing"));
    }

    #[tokio::test]
    async fn test_color_outside_tool_values_is_rejected() {
        let widgets = Widgets::new();
        let (orch, _) = orchestrator(&widgets);

        let response = orch
            .dispatch(InboundEnvelope::new(
                "create_widget_tool",
                "alice",
                json!({"title": "Sprocket", "color": "green"}),
            ))
            .await;
        assert_eq!(
            response.error.unwrap().sub_kind,
            Some(PolicyViolationKind::InvalidParameters)
        );

        let listed = orch
            .dispatch(InboundEnvelope::new("list_widgets_tool", "alice", json!({})))
            .await;
        assert_eq!(listed.result, Some(json!([])));
    }
}
