//! Parameter descriptors and the normalized type table

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Normalized parameter type
///
/// Deserialization goes through [`TYPE_ALIASES`], so `"str"` reads as `string`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Enum,
    /// Type could not be mapped; callers decide whether this is fatal
    Unknown,
}

/// Spellings accepted for each normalized type.
///
/// Two independently authored specifications rarely agree on naming, so every
/// declared type name goes through this table before comparison.
pub const TYPE_ALIASES: &[(&str, ParamType)] = &[
    ("string", ParamType::String),
    ("str", ParamType::String),
    ("text", ParamType::String),
    ("integer", ParamType::Integer),
    ("int", ParamType::Integer),
    ("i32", ParamType::Integer),
    ("i64", ParamType::Integer),
    ("u32", ParamType::Integer),
    ("u64", ParamType::Integer),
    ("number", ParamType::Number),
    ("float", ParamType::Number),
    ("double", ParamType::Number),
    ("f32", ParamType::Number),
    ("f64", ParamType::Number),
    ("decimal", ParamType::Number),
    ("boolean", ParamType::Boolean),
    ("bool", ParamType::Boolean),
    ("array", ParamType::Array),
    ("list", ParamType::Array),
    ("vec", ParamType::Array),
    ("sequence", ParamType::Array),
    ("object", ParamType::Object),
    ("dict", ParamType::Object),
    ("map", ParamType::Object),
    ("hashmap", ParamType::Object),
    ("enum", ParamType::Enum),
    ("literal", ParamType::Enum),
];

impl ParamType {
    /// Normalize a declared type name through the alias table
    pub fn from_name(name: &str) -> Self {
        let needle = name.trim().to_ascii_lowercase();
        TYPE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == needle)
            .map(|(_, ty)| *ty)
            .unwrap_or(ParamType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Enum => "enum",
            ParamType::Unknown => "unknown",
        }
    }

    /// Whether a JSON value is already of this type (no coercion)
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Enum => value.is_string() || value.is_number(),
            ParamType::Unknown => true,
        }
    }
}

impl From<String> for ParamType {
    fn from(name: String) -> Self {
        ParamType::from_name(&name)
    }
}

impl From<ParamType> for String {
    fn from(ty: ParamType) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value constraints attached to a parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// `min` itself is rejected
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_min: bool,
    /// `max` itself is rejected
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_max: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Mark the range bounds as exclusive
    pub fn exclusive(mut self, min: bool, max: bool) -> Self {
        self.exclusive_min = min;
        self.exclusive_max = max;
        self
    }

    pub fn length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }
}

/// Normalized description of one input or output parameter.
///
/// Immutable once produced: builders consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub declared_type: ParamType,
    /// Element type for arrays, value type for objects built from maps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ParamType>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDescriptor {
    /// Required parameter; `type_name` goes through the alias table
    pub fn required(name: impl Into<String>, type_name: &str) -> Self {
        Self::with_type(name, ParamType::from_name(type_name), true)
    }

    /// Optional parameter; `type_name` goes through the alias table
    pub fn optional(name: impl Into<String>, type_name: &str) -> Self {
        Self::with_type(name, ParamType::from_name(type_name), false)
    }

    pub fn with_type(name: impl Into<String>, declared_type: ParamType, required: bool) -> Self {
        Self {
            name: name.into(),
            declared_type,
            item_type: None,
            required,
            default: None,
            constraints: Constraints::default(),
            description: None,
        }
    }

    pub fn items(mut self, item_type: ParamType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    /// A parameter with a default is never required
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alias_table() {
        assert_eq!(ParamType::from_name("str"), ParamType::String);
        assert_eq!(ParamType::from_name("String"), ParamType::String);
        assert_eq!(ParamType::from_name("i64"), ParamType::Integer);
        assert_eq!(ParamType::from_name("dict"), ParamType::Object);
        assert_eq!(ParamType::from_name("Literal"), ParamType::Enum);
        assert_eq!(ParamType::from_name("datetime"), ParamType::Unknown);
    }

    #[test]
    fn test_deserialize_through_aliases() {
        let p: ParameterDescriptor =
            serde_json::from_value(json!({"name": "n", "declared_type": "int", "required": true}))
                .unwrap();
        assert_eq!(p.declared_type, ParamType::Integer);
        assert_eq!(serde_json::to_value(ParamType::Integer).unwrap(), json!("integer"));
    }

    #[test]
    fn test_accepts() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Number.accepts(&json!(3)));
        assert!(!ParamType::String.accepts(&json!(true)));
    }

    #[test]
    fn test_default_makes_optional() {
        let p = ParameterDescriptor::required("limit", "int").default_value(json!(10));
        assert!(!p.required);
        assert_eq!(p.default, Some(json!(10)));
    }

    #[test]
    fn test_descriptor_serialization_skips_empty() {
        let p = ParameterDescriptor::required("title", "string");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            json!({"name": "title", "declared_type": "string", "required": true})
        );
    }
}
