//! Method Definitions
//!
//! A method is one backend operation: a callable plus its input/output schema
//! and classification. Definitions are built once during bootstrap and never
//! mutated afterwards.

use op_core::ParameterDescriptor;
use op_introspection::{introspect_json_schema, introspect_model, InputModel, Introspection, SchemaShape};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::tool::BoxedHandler;

/// Security level for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Safe read-only operations
    #[default]
    ReadOnly,
    /// Operations that modify state but are reversible
    Modify,
    /// Operations that may have significant impact
    Elevated,
    /// Operations requiring explicit approval
    Critical,
}

/// Classification metadata used for listing and filtering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub tags: Vec<String>,
    pub security_level: SecurityLevel,
}

impl Classification {
    pub fn new(category: impl Into<String>, security_level: SecurityLevel) -> Self {
        Self {
            category: category.into(),
            tags: Vec::new(),
            security_level,
        }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Registered backend operation
#[derive(Clone)]
pub struct MethodDefinition {
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Vec<ParameterDescriptor>,
    /// Shape reported by the introspector for the input model
    pub input_shape: SchemaShape,
    pub output_schema: Vec<ParameterDescriptor>,
    pub classification: Classification,
    handler: BoxedHandler,
}

impl MethodDefinition {
    /// Method with no declared input
    pub fn new(qualified_name: impl Into<String>, handler: BoxedHandler) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            description: String::new(),
            input_schema: Vec::new(),
            input_shape: SchemaShape::Empty,
            output_schema: Vec::new(),
            classification: Classification::default(),
            handler,
        }
    }

    /// Method whose input schema is introspected from `I`
    pub fn from_model<I: InputModel>(qualified_name: impl Into<String>, handler: BoxedHandler) -> Self {
        Self::new(qualified_name, handler).with_input(introspect_model(&I::model_spec()))
    }

    pub fn with_input(mut self, introspection: Introspection) -> Self {
        self.input_schema = introspection.parameters;
        self.input_shape = introspection.shape;
        self
    }

    /// Input described as a JSON Schema document
    pub fn with_json_input(self, schema: &Value) -> Self {
        self.with_input(introspect_json_schema(schema))
    }

    pub fn with_output<O: InputModel>(mut self) -> Self {
        self.output_schema = introspect_model(&O::model_spec()).parameters;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn classified(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    pub fn input(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.input_schema.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("qualified_name", &self.qualified_name)
            .field("input_schema", &self.input_schema)
            .field("input_shape", &self.input_shape)
            .field("output_schema", &self.output_schema)
            .field("classification", &self.classification)
            .finish()
    }
}
