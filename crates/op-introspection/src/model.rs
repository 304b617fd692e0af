//! Model description interface
//!
//! Every input model describes its own shape through [`InputModel`]. The
//! introspector turns that description into normalized parameter descriptors.

use op_core::Constraints;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a field, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "of")]
pub enum TypeExpr {
    /// Plain type name, resolved through the alias table
    Named(String),
    /// Nullable / optional wrapper
    Optional(Box<TypeExpr>),
    /// Homogeneous sequence
    List(Box<TypeExpr>),
    /// Key/value container
    Map(Box<TypeExpr>, Box<TypeExpr>),
    /// Closed set of literal values
    Literal(Vec<Value>),
    /// Reference to another model
    Model(String),
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into())
    }

    pub fn optional(inner: TypeExpr) -> Self {
        TypeExpr::Optional(Box::new(inner))
    }

    pub fn list(item: TypeExpr) -> Self {
        TypeExpr::List(Box::new(item))
    }

    pub fn map(key: TypeExpr, value: TypeExpr) -> Self {
        TypeExpr::Map(Box::new(key), Box::new(value))
    }

    pub fn literal(values: Vec<Value>) -> Self {
        TypeExpr::Literal(values)
    }

    pub fn model(name: impl Into<String>) -> Self {
        TypeExpr::Model(name.into())
    }

    /// Parse a textual type annotation.
    ///
    /// Understands `Option<T>`, `Optional[T]`, `T | None`, `T?`, `list[T]`,
    /// `Vec<T>`, `dict[K, V]`, `HashMap<K, V>` and `Literal['a', 'b']`.
    /// Anything else is kept as a plain name.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        if let Some(inner) = text.strip_suffix('?') {
            return TypeExpr::optional(TypeExpr::parse(inner));
        }

        let union: Vec<&str> = split_top_level(text, '|');
        if union.len() > 1 {
            let non_null: Vec<&str> = union
                .iter()
                .copied()
                .filter(|p| !matches!(p.trim(), "None" | "null" | "NoneType"))
                .collect();
            if non_null.len() == 1 && non_null.len() < union.len() {
                return TypeExpr::optional(TypeExpr::parse(non_null[0]));
            }
            return TypeExpr::Named(text.to_string());
        }

        let Some((head, args)) = split_generic(text) else {
            return TypeExpr::Named(text.to_string());
        };

        match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("option" | "optional", [inner]) => TypeExpr::optional(TypeExpr::parse(inner)),
            ("list" | "vec" | "sequence" | "set" | "hashset" | "tuple", [item]) => {
                TypeExpr::list(TypeExpr::parse(item))
            }
            ("list" | "vec" | "sequence", []) => TypeExpr::list(TypeExpr::named("unknown")),
            ("dict" | "map" | "hashmap" | "btreemap" | "mapping", [k, v]) => {
                TypeExpr::map(TypeExpr::parse(k), TypeExpr::parse(v))
            }
            ("literal", values) => TypeExpr::literal(
                values
                    .iter()
                    .map(|v| parse_literal(v))
                    .collect(),
            ),
            _ => TypeExpr::Named(text.to_string()),
        }
    }
}

/// Split `Head<a, b>` or `Head[a, b]` into its head and top-level arguments
fn split_generic(text: &str) -> Option<(&str, Vec<&str>)> {
    let open = text.find(['<', '['])?;
    let close = match &text[open..open + 1] {
        "<" => '>',
        _ => ']',
    };
    let inner = text.get(open + 1..)?.strip_suffix(close)?;
    let head = text[..open].trim();
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, ',').into_iter().map(str::trim).collect()
    };
    Some((head, args))
}

/// Split on `sep` ignoring separators nested inside brackets
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '<' | '[' | '(' => depth += 1,
            '>' | ']' | ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|v| v.strip_suffix('"')));
    match unquoted {
        Some(s) => Value::String(s.to_string()),
        None => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

/// One declared field of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeExpr,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            constraints: Constraints::default(),
            description: None,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn constrained(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Self-description of a data model, including the models it extends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// Base models, flattened before this model's own fields
    #[serde(default)]
    pub bases: Vec<ModelSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, base: ModelSpec) -> Self {
        self.bases.push(base);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

/// Implemented by every operation input and output model
pub trait InputModel {
    fn model_spec() -> ModelSpec;
}

impl InputModel for () {
    fn model_spec() -> ModelSpec {
        ModelSpec::new("Unit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain() {
        assert_eq!(TypeExpr::parse("str"), TypeExpr::named("str"));
    }

    #[test]
    fn test_parse_optional_forms() {
        let expected = TypeExpr::optional(TypeExpr::named("int"));
        assert_eq!(TypeExpr::parse("Option<int>"), expected);
        assert_eq!(TypeExpr::parse("Optional[int]"), expected);
        assert_eq!(TypeExpr::parse("int | None"), expected);
        assert_eq!(TypeExpr::parse("int?"), expected);
    }

    #[test]
    fn test_parse_containers() {
        assert_eq!(
            TypeExpr::parse("Vec<Option<String>>"),
            TypeExpr::list(TypeExpr::optional(TypeExpr::named("String")))
        );
        assert_eq!(
            TypeExpr::parse("dict[str, list[int]]"),
            TypeExpr::map(
                TypeExpr::named("str"),
                TypeExpr::list(TypeExpr::named("int"))
            )
        );
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            TypeExpr::parse("Literal['draft', 'live', 3]"),
            TypeExpr::literal(vec![json!("draft"), json!("live"), json!(3)])
        );
    }

    #[test]
    fn test_parse_real_union_stays_named() {
        assert_eq!(TypeExpr::parse("int | str"), TypeExpr::named("int | str"));
    }
}
