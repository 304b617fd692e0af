//! op-introspection: Schema introspection
//!
//! This crate provides:
//! - The `InputModel` description interface models implement
//! - Textual type annotation parsing (`Option<T>`, `list[T]`, `Literal[...]`)
//! - Extraction of normalized parameter descriptors, flattening inheritance
//! - JSON Schema extraction for models described as schema documents
//!
//! Unmappable types are reported as `ParamType::Unknown`, never as errors.

pub mod extract;
pub mod json_schema;
pub mod model;

pub use extract::{extract, introspect_model, normalize, Introspection, SchemaShape};
pub use json_schema::{introspect_json_schema, to_json_schema};
pub use model::{FieldSpec, InputModel, ModelSpec, TypeExpr};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        extract, introspect_json_schema, introspect_model, FieldSpec, InputModel, Introspection,
        ModelSpec, SchemaShape, TypeExpr,
    };
}
