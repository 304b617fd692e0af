//! Parameter extraction from JSON Schema documents
//!
//! Handles `required`, nullable unions (`["string", "null"]`, `anyOf` with a
//! null branch), `items` / `additionalProperties` element types, `enum`, local
//! `$ref`s into `$defs` / `definitions`, and `allOf` composition which is
//! flattened base-first like model inheritance.

use op_core::{Constraints, ParamType, ParameterDescriptor};
use serde_json::{Map, Value};
use tracing::debug;

use crate::extract::{Introspection, SchemaShape};

/// Guard against self-referencing `$ref` chains
const MAX_REF_DEPTH: usize = 16;

/// Extract parameters from a JSON Schema object
pub fn introspect_json_schema(schema: &Value) -> Introspection {
    let model = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("anonymous")
        .to_string();

    let mut parameters = Vec::new();
    let mut opaque = false;
    collect_object(schema, schema, 0, &mut parameters, &mut opaque);

    let shape = if !parameters.is_empty() {
        SchemaShape::Fields
    } else if opaque {
        SchemaShape::Opaque
    } else {
        SchemaShape::Empty
    };

    debug!(
        model = %model,
        parameters = parameters.len(),
        ?shape,
        "Introspected JSON schema"
    );

    Introspection {
        model,
        parameters,
        shape,
    }
}

fn resolve<'a>(root: &'a Value, node: &'a Value) -> Option<&'a Value> {
    let mut current = node;
    for _ in 0..MAX_REF_DEPTH {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Some(current);
        };
        let pointer = reference.strip_prefix('#')?;
        current = root.pointer(pointer)?;
    }
    None
}

fn collect_object(
    root: &Value,
    node: &Value,
    depth: usize,
    out: &mut Vec<ParameterDescriptor>,
    opaque: &mut bool,
) {
    if depth > MAX_REF_DEPTH {
        *opaque = true;
        return;
    }
    let Some(node) = resolve(root, node) else {
        *opaque = true;
        return;
    };

    if let Some(parts) = node.get("allOf").and_then(Value::as_array) {
        for part in parts {
            collect_object(root, part, depth + 1, out, opaque);
        }
    }

    let required: Vec<&str> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    match node.get("properties").and_then(Value::as_object) {
        Some(properties) => {
            for (name, prop) in properties {
                let descriptor = describe_property(root, name, prop, required.contains(&name.as_str()));
                match out.iter_mut().find(|p| p.name == descriptor.name) {
                    Some(existing) => *existing = descriptor,
                    None => out.push(descriptor),
                }
            }
        }
        None => {
            let has_hidden_structure = ["additionalProperties", "patternProperties", "oneOf", "anyOf"]
                .iter()
                .any(|k| node.get(*k).is_some_and(|v| v != &Value::Bool(false)));
            if has_hidden_structure {
                *opaque = true;
            }
        }
    }
}

struct PropertyType {
    declared_type: ParamType,
    item_type: Option<ParamType>,
    nullable: bool,
}

fn describe_property(root: &Value, name: &str, prop: &Value, listed_required: bool) -> ParameterDescriptor {
    let resolved = resolve(root, prop).unwrap_or(prop);
    let ty = property_type(root, resolved, 0);
    let default = resolved.get("default").cloned();

    ParameterDescriptor {
        name: name.to_string(),
        declared_type: ty.declared_type,
        item_type: ty.item_type,
        required: listed_required && default.is_none() && !ty.nullable,
        default,
        constraints: constraints_of(resolved, ty.declared_type),
        description: resolved
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn property_type(root: &Value, node: &Value, depth: usize) -> PropertyType {
    if depth > MAX_REF_DEPTH {
        return PropertyType {
            declared_type: ParamType::Unknown,
            item_type: None,
            nullable: false,
        };
    }
    if node.get("enum").is_some() {
        let nullable = node
            .get("enum")
            .and_then(Value::as_array)
            .is_some_and(|values| values.contains(&Value::Null));
        return PropertyType {
            declared_type: ParamType::Enum,
            item_type: None,
            nullable,
        };
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(variants) = node.get(key).and_then(Value::as_array) {
            let (nulls, rest): (Vec<&Value>, Vec<&Value>) =
                variants.iter().partition(|v| v.get("type") == Some(&Value::from("null")));
            if rest.len() == 1 {
                let inner = resolve(root, rest[0]).unwrap_or(rest[0]);
                let mut ty = property_type(root, inner, depth + 1);
                ty.nullable |= !nulls.is_empty();
                return ty;
            }
            return PropertyType {
                declared_type: ParamType::Unknown,
                item_type: None,
                nullable: !nulls.is_empty(),
            };
        }
    }

    let (type_name, nullable) = match node.get("type") {
        Some(Value::String(s)) => (Some(s.as_str()), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
            let nullable = non_null.len() < names.len();
            match non_null.as_slice() {
                [single] => (Some(*single), nullable),
                _ => (None, nullable),
            }
        }
        _ if node.get("properties").is_some() => (Some("object"), false),
        _ => (None, false),
    };

    let declared_type = type_name.map(ParamType::from_name).unwrap_or(ParamType::Unknown);
    let item_type = match declared_type {
        ParamType::Array => node
            .get("items")
            .map(|items| element_type(root, items, depth)),
        ParamType::Object => node
            .get("additionalProperties")
            .filter(|v| v.is_object())
            .map(|v| element_type(root, v, depth)),
        _ => None,
    };

    PropertyType {
        declared_type,
        item_type,
        nullable,
    }
}

fn element_type(root: &Value, node: &Value, depth: usize) -> ParamType {
    match resolve(root, node) {
        Some(resolved) => property_type(root, resolved, depth + 1).declared_type,
        None => ParamType::Unknown,
    }
}

/// Lower or upper bound, either `minimum` + boolean `exclusiveMinimum`
/// or a numeric `exclusiveMinimum`. When both numeric forms are present the
/// tighter one wins.
fn bound(node: &Value, inclusive_key: &str, exclusive_key: &str, lower: bool) -> (Option<f64>, bool) {
    let inclusive = node.get(inclusive_key).and_then(Value::as_f64);
    match node.get(exclusive_key) {
        Some(Value::Bool(exclusive)) => (inclusive, *exclusive && inclusive.is_some()),
        Some(Value::Number(n)) => match (n.as_f64(), inclusive) {
            (Some(e), Some(i)) if (lower && i > e) || (!lower && i < e) => (Some(i), false),
            (Some(e), _) => (Some(e), true),
            (None, _) => (inclusive, false),
        },
        _ => (inclusive, false),
    }
}

fn as_usize(node: &Value, key: &str) -> Option<usize> {
    node.get(key)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

fn constraints_of(node: &Value, declared_type: ParamType) -> Constraints {
    let (min_len_key, max_len_key) = match declared_type {
        ParamType::Array => ("minItems", "maxItems"),
        ParamType::Object => ("minProperties", "maxProperties"),
        _ => ("minLength", "maxLength"),
    };

    let (min, exclusive_min) = bound(node, "minimum", "exclusiveMinimum", true);
    let (max, exclusive_max) = bound(node, "maximum", "exclusiveMaximum", false);

    Constraints {
        min,
        max,
        exclusive_min,
        exclusive_max,
        min_length: as_usize(node, min_len_key),
        max_length: as_usize(node, max_len_key),
        pattern: node
            .get("pattern")
            .and_then(Value::as_str)
            .map(str::to_string),
        allowed_values: node
            .get("enum")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter(|v| !v.is_null()).cloned().collect()),
    }
}

/// Render descriptors back into a JSON Schema object
pub fn to_json_schema(parameters: &[ParameterDescriptor]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for p in parameters {
        let mut prop = Map::new();
        let type_name = match p.declared_type {
            ParamType::Enum => None,
            ParamType::Unknown => None,
            other => Some(other.as_str()),
        };
        if let Some(t) = type_name {
            prop.insert("type".to_string(), Value::from(t));
        }
        match (p.declared_type, p.item_type) {
            (ParamType::Array, Some(item)) => {
                prop.insert("items".to_string(), serde_json::json!({"type": item.as_str()}));
            }
            (ParamType::Object, Some(item)) => {
                prop.insert(
                    "additionalProperties".to_string(),
                    serde_json::json!({"type": item.as_str()}),
                );
            }
            _ => {}
        }
        let c = &p.constraints;
        if let Some(values) = &c.allowed_values {
            prop.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if let Some(min) = c.min {
            let key = if c.exclusive_min { "exclusiveMinimum" } else { "minimum" };
            prop.insert(key.to_string(), Value::from(min));
        }
        if let Some(max) = c.max {
            let key = if c.exclusive_max { "exclusiveMaximum" } else { "maximum" };
            prop.insert(key.to_string(), Value::from(max));
        }
        if let Some(n) = c.min_length {
            prop.insert("minLength".to_string(), Value::from(n));
        }
        if let Some(n) = c.max_length {
            prop.insert("maxLength".to_string(), Value::from(n));
        }
        if let Some(pattern) = &c.pattern {
            prop.insert("pattern".to_string(), Value::from(pattern.as_str()));
        }
        if let Some(default) = &p.default {
            prop.insert("default".to_string(), default.clone());
        }
        if let Some(description) = &p.description {
            prop.insert("description".to_string(), Value::from(description.as_str()));
        }
        if p.required {
            required.push(Value::from(p.name.as_str()));
        }
        properties.insert(p.name.clone(), Value::Object(prop));
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param<'a>(result: &'a Introspection, name: &str) -> &'a ParameterDescriptor {
        result.parameters.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn test_basic_properties() {
        let schema = json!({
            "title": "CreateWidget",
            "type": "object",
            "properties": {
                "title": {"type": "string", "minLength": 1, "maxLength": 80},
                "count": {"type": "integer", "minimum": 0, "default": 1},
                "note": {"type": ["string", "null"]}
            },
            "required": ["title", "count", "note"]
        });
        let result = introspect_json_schema(&schema);
        assert_eq!(result.model, "CreateWidget");
        assert_eq!(result.shape, SchemaShape::Fields);

        let title = param(&result, "title");
        assert!(title.required);
        assert_eq!(title.constraints.min_length, Some(1));
        assert_eq!(title.constraints.max_length, Some(80));

        assert!(!param(&result, "count").required);
        assert!(!param(&result, "note").required);
        assert_eq!(param(&result, "note").declared_type, ParamType::String);
    }

    #[test]
    fn test_all_of_flattens_base_first() {
        let schema = json!({
            "$defs": {
                "Base": {
                    "type": "object",
                    "properties": {"owner": {"type": "string"}},
                    "required": ["owner"]
                }
            },
            "allOf": [{"$ref": "#/$defs/Base"}],
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 5},
                "kind": {"enum": ["a", "b"]},
                "extra": {"anyOf": [{"type": "integer"}, {"type": "null"}]}
            }
        });
        let result = introspect_json_schema(&schema);
        assert_eq!(result.parameters[0].name, "owner");
        assert!(result.parameters[0].required);

        let tags = param(&result, "tags");
        assert_eq!(tags.item_type, Some(ParamType::String));
        assert_eq!(tags.constraints.max_length, Some(5));

        let kind = param(&result, "kind");
        assert_eq!(kind.declared_type, ParamType::Enum);
        assert_eq!(kind.constraints.allowed_values, Some(vec![json!("a"), json!("b")]));

        assert_eq!(param(&result, "extra").declared_type, ParamType::Integer);
    }

    #[test]
    fn test_shapes_without_properties() {
        let empty = introspect_json_schema(&json!({"type": "object"}));
        assert_eq!(empty.shape, SchemaShape::Empty);

        let opaque = introspect_json_schema(&json!({
            "type": "object",
            "additionalProperties": {"type": "string"}
        }));
        assert!(opaque.parameters.is_empty());
        assert_eq!(opaque.shape, SchemaShape::Opaque);

        let dangling = introspect_json_schema(&json!({"$ref": "#/$defs/Missing"}));
        assert_eq!(dangling.shape, SchemaShape::Opaque);
    }

    #[test]
    fn test_self_referencing_definition_stops() {
        let schema = json!({
            "$defs": {
                "Tree": {"type": "array", "items": {"$ref": "#/$defs/Tree"}}
            },
            "properties": {
                "tree": {"$ref": "#/$defs/Tree"},
                "node": {"$ref": "#/$defs/Node"}
            }
        });
        let mut with_map = schema.clone();
        with_map["$defs"]["Node"] = json!({
            "type": "object",
            "additionalProperties": {"anyOf": [{"$ref": "#/$defs/Node"}, {"type": "null"}]}
        });

        let result = introspect_json_schema(&with_map);
        assert_eq!(result.shape, SchemaShape::Fields);
        let tree = param(&result, "tree");
        assert_eq!(tree.declared_type, ParamType::Array);
        assert_eq!(tree.item_type, Some(ParamType::Array));
        assert_eq!(param(&result, "node").declared_type, ParamType::Object);
    }

    #[test]
    fn test_exclusive_bounds() {
        let schema = json!({
            "properties": {
                "ratio": {"type": "number", "exclusiveMinimum": 0, "maximum": 1},
                "legacy": {"type": "integer", "minimum": 0, "exclusiveMinimum": true},
                "both": {"type": "number", "minimum": 5, "exclusiveMinimum": 2, "exclusiveMaximum": 9}
            }
        });
        let result = introspect_json_schema(&schema);

        let ratio = &param(&result, "ratio").constraints;
        assert_eq!((ratio.min, ratio.exclusive_min), (Some(0.0), true));
        assert_eq!((ratio.max, ratio.exclusive_max), (Some(1.0), false));

        let legacy = &param(&result, "legacy").constraints;
        assert_eq!((legacy.min, legacy.exclusive_min), (Some(0.0), true));

        let both = &param(&result, "both").constraints;
        assert_eq!((both.min, both.exclusive_min), (Some(5.0), false));
        assert_eq!((both.max, both.exclusive_max), (Some(9.0), true));

        let back = introspect_json_schema(&to_json_schema(&result.parameters));
        assert_eq!(param(&back, "ratio").constraints, *ratio);
    }

    #[test]
    fn test_render_keeps_map_value_type() {
        let params = vec![ParameterDescriptor::optional("labels", "object").items(ParamType::String)];
        let schema = to_json_schema(&params);
        assert_eq!(schema["properties"]["labels"]["additionalProperties"], json!({"type": "string"}));

        let back = introspect_json_schema(&schema);
        assert_eq!(param(&back, "labels").item_type, Some(ParamType::String));
    }

    #[test]
    fn test_render_round_trip_preserves_requirements() {
        let params = vec![
            ParameterDescriptor::required("title", "string"),
            ParameterDescriptor::optional("limit", "int"),
        ];
        let schema = to_json_schema(&params);
        let back = introspect_json_schema(&schema);
        assert!(param(&back, "title").required);
        assert!(!param(&back, "limit").required);
    }
}
