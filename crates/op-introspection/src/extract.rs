//! Parameter extraction from model descriptions

use op_core::{ParamType, ParameterDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::model::{InputModel, ModelSpec, TypeExpr};

/// What the extracted parameter list says about the model's shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaShape {
    /// At least one parameter was extracted
    Fields,
    /// The model declares no fields at all
    Empty,
    /// The model has structure the introspector could not see into
    Opaque,
}

/// Result of introspecting one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introspection {
    pub model: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub shape: SchemaShape,
}

/// Normalized form of a declared type
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedType {
    pub declared_type: ParamType,
    pub item_type: Option<ParamType>,
    pub optional: bool,
    pub allowed_values: Option<Vec<Value>>,
}

/// Normalize a declared type. Unmappable names become `Unknown`.
pub fn normalize(ty: &TypeExpr) -> NormalizedType {
    match ty {
        TypeExpr::Optional(inner) => NormalizedType {
            optional: true,
            ..normalize(inner)
        },
        TypeExpr::Named(name) => {
            let parsed = TypeExpr::parse(name);
            if !matches!(&parsed, TypeExpr::Named(n) if n == name) {
                return normalize(&parsed);
            }
            let declared_type = ParamType::from_name(name);
            if declared_type == ParamType::Unknown {
                debug!(type_name = %name, "Type not in alias table, reporting as unknown");
            }
            NormalizedType {
                declared_type,
                item_type: None,
                optional: false,
                allowed_values: None,
            }
        }
        TypeExpr::List(item) => NormalizedType {
            declared_type: ParamType::Array,
            item_type: Some(element_type(item)),
            optional: false,
            allowed_values: None,
        },
        TypeExpr::Map(_, value) => NormalizedType {
            declared_type: ParamType::Object,
            item_type: Some(element_type(value)),
            optional: false,
            allowed_values: None,
        },
        TypeExpr::Literal(values) => NormalizedType {
            declared_type: ParamType::Enum,
            item_type: None,
            optional: false,
            allowed_values: Some(values.clone()),
        },
        TypeExpr::Model(_) => NormalizedType {
            declared_type: ParamType::Object,
            item_type: None,
            optional: false,
            allowed_values: None,
        },
    }
}

/// Element types ignore optionality
fn element_type(ty: &TypeExpr) -> ParamType {
    normalize(ty).declared_type
}

/// Extract the parameter list of a model
pub fn extract<M: InputModel>() -> Vec<ParameterDescriptor> {
    introspect_model(&M::model_spec()).parameters
}

/// Extract parameters with shape information.
///
/// Base models are flattened first, in declaration order. A field redeclared
/// by a subclass keeps its base position and takes the subclass definition.
pub fn introspect_model(spec: &ModelSpec) -> Introspection {
    let mut parameters: Vec<ParameterDescriptor> = Vec::new();
    flatten_into(spec, &mut parameters);

    let shape = if parameters.is_empty() {
        SchemaShape::Empty
    } else {
        SchemaShape::Fields
    };

    debug!(
        model = %spec.name,
        parameters = parameters.len(),
        "Introspected model"
    );

    Introspection {
        model: spec.name.clone(),
        parameters,
        shape,
    }
}

fn flatten_into(spec: &ModelSpec, out: &mut Vec<ParameterDescriptor>) {
    for base in &spec.bases {
        flatten_into(base, out);
    }

    for field in &spec.fields {
        let normalized = normalize(&field.ty);
        let mut constraints = field.constraints.clone();
        if constraints.allowed_values.is_none() {
            constraints.allowed_values = normalized.allowed_values;
        }

        let descriptor = ParameterDescriptor {
            name: field.name.clone(),
            declared_type: normalized.declared_type,
            item_type: normalized.item_type,
            required: field.default.is_none() && !normalized.optional,
            default: field.default.clone(),
            constraints,
            description: field.description.clone(),
        };

        match out.iter_mut().find(|p| p.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => out.push(descriptor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldSpec;
    use op_core::Constraints;
    use serde_json::json;

    struct Auditable;

    impl InputModel for Auditable {
        fn model_spec() -> ModelSpec {
            ModelSpec::new("Auditable")
                .field(FieldSpec::new("reason", TypeExpr::optional(TypeExpr::named("str"))))
                .field(FieldSpec::new("owner", TypeExpr::named("str")))
        }
    }

    struct CreateWidget;

    impl InputModel for CreateWidget {
        fn model_spec() -> ModelSpec {
            ModelSpec::new("CreateWidget")
                .extends(Auditable::model_spec())
                .field(
                    FieldSpec::new("title", TypeExpr::named("str"))
                        .constrained(Constraints::default().length(Some(1), Some(80))),
                )
                .field(FieldSpec::new("tags", TypeExpr::parse("list[str]")))
                .field(
                    FieldSpec::new("priority", TypeExpr::named("int")).default_value(json!(3)),
                )
                .field(FieldSpec::new("labels", TypeExpr::parse("dict[str, float]")))
                .field(FieldSpec::new("state", TypeExpr::parse("Literal['draft', 'live']")))
                .field(FieldSpec::new("created", TypeExpr::named("datetime")))
                .field(FieldSpec::new("owner", TypeExpr::optional(TypeExpr::named("str"))))
        }
    }

    fn param<'a>(params: &'a [ParameterDescriptor], name: &str) -> &'a ParameterDescriptor {
        params.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn test_inherited_fields_come_first() {
        let params = extract::<CreateWidget>();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["reason", "owner", "title", "tags", "priority", "labels", "state", "created"]
        );
    }

    #[test]
    fn test_redeclared_field_takes_subclass_definition() {
        let params = extract::<CreateWidget>();
        assert!(!param(&params, "owner").required);
    }

    #[test]
    fn test_required_rules() {
        let params = extract::<CreateWidget>();
        assert!(param(&params, "title").required);
        assert!(!param(&params, "reason").required);
        assert!(!param(&params, "priority").required);
        assert_eq!(param(&params, "priority").default, Some(json!(3)));
    }

    #[test]
    fn test_container_and_enum_types() {
        let params = extract::<CreateWidget>();
        let tags = param(&params, "tags");
        assert_eq!(tags.declared_type, ParamType::Array);
        assert_eq!(tags.item_type, Some(ParamType::String));

        let labels = param(&params, "labels");
        assert_eq!(labels.declared_type, ParamType::Object);
        assert_eq!(labels.item_type, Some(ParamType::Number));

        let state = param(&params, "state");
        assert_eq!(state.declared_type, ParamType::Enum);
        assert_eq!(
            state.constraints.allowed_values,
            Some(vec![json!("draft"), json!("live")])
        );
    }

    #[test]
    fn test_unmapped_type_is_unknown_not_error() {
        let params = extract::<CreateWidget>();
        assert_eq!(param(&params, "created").declared_type, ParamType::Unknown);
    }

    #[test]
    fn test_named_annotation_is_parsed() {
        let n = normalize(&TypeExpr::named("Option<i64>"));
        assert_eq!(n.declared_type, ParamType::Integer);
        assert!(n.optional);
    }

    #[test]
    fn test_deterministic() {
        let first = introspect_model(&CreateWidget::model_spec());
        for _ in 0..5 {
            assert_eq!(introspect_model(&CreateWidget::model_spec()), first);
        }
    }

    #[test]
    fn test_unit_model_is_empty() {
        let result = introspect_model(&<() as InputModel>::model_spec());
        assert!(result.parameters.is_empty());
        assert_eq!(result.shape, SchemaShape::Empty);
    }
}
