//! # Schema Capability
//!
//! The structural contract a model response must satisfy.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SchemaModel`] | Object-safe capability used by the cleaner and the retry controller |
//! | [`SchemaDocument`] | JSON-Schema-backed implementation |
//! | [`SchemaBuilder`] | Fluent construction of object schemas |
//! | [`SchemaDescription`] | Shape and field names embedded into prompts |
//!
//! ## Supported keywords
//!
//! `type` (single or list), `properties`, `required`, `additionalProperties`,
//! `items`, `enum`, `const`, `minimum`, `maximum`, `exclusiveMinimum`,
//! `exclusiveMaximum`, `minLength`, `maxLength`, `pattern`, `minItems`,
//! `maxItems`, `$ref` (local pointers such as `#/definitions/Address`),
//! `anyOf`, `oneOf` and `allOf`. Unknown keywords are ignored.
//!
//! ## Additional properties
//!
//! | Keyword | Validation | Canonical form |
//! |---------|------------|----------------|
//! | absent | extras tolerated | extras dropped |
//! | `false` | [`ErrorKind::FieldNotAllowed`](crate::ErrorKind::FieldNotAllowed) per extra key | extras dropped |
//! | `true` or a schema | extras validated against it | extras kept |
//!
//! ## Example
//!
//! ```rust
//! use ferroshape_core::{FieldType, SchemaBuilder, SchemaModel};
//! use serde_json::json;
//!
//! let schema = SchemaBuilder::new("Person")
//!     .required("name", FieldType::String)
//!     .required("age", FieldType::Integer)
//!     .build()?;
//!
//! assert!(schema.validate(&json!({"name": "Ada", "age": 36})).is_valid());
//! assert!(!schema.validate(&json!({"name": "Ada"})).is_valid());
//! # Ok::<(), ferroshape_core::SchemaError>(())
//! ```

mod builder;
mod partial;
mod validator;

use serde_json::{Map, Value};

use crate::validation::ValidationOutcome;

pub use builder::{FieldType, SchemaBuilder};

use validator::{Patterns, Validator};

/// Error raised while constructing a schema document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The schema root is not a JSON object.
    #[error("schema root must be a JSON object")]
    NotAnObject,

    /// The schema root declares a type other than `object`.
    #[error("schema root must describe an object, found type '{0}'")]
    RootNotObject(String),

    /// The schema could not be produced from a Rust type.
    #[error("failed to serialize generated schema: {0}")]
    Serialize(String),

    /// A `pattern` keyword is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Prompt-facing description of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescription {
    pub title: Option<String>,
    /// The full JSON-Schema-like document.
    pub shape: Value,
    /// Top-level field names in declaration order.
    pub field_names: Vec<String>,
}

impl SchemaDescription {
    /// Compact JSON rendering of the shape.
    pub fn shape_json(&self) -> String {
        self.shape.to_string()
    }
}

/// The capability the validation loop needs from a schema.
pub trait SchemaModel: Send + Sync {
    /// Validate a value, reporting every error in a deterministic order.
    fn validate(&self, value: &Value) -> ValidationOutcome;

    fn describe(&self) -> SchemaDescription;

    /// A relaxed copy in which every field is optional and nullable.
    fn as_partial(&self) -> Box<dyn SchemaModel>;

    /// Serialize a valid value: only declared, explicitly present fields are kept.
    fn canonicalize(&self, value: &Value) -> Value;

    /// An object with every top-level field set to `null`.
    fn empty_instance(&self) -> Value;
}

/// A schema backed by a JSON Schema document.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    root: Value,
    patterns: Patterns,
}

impl SchemaDocument {
    /// Build from a JSON Schema value. The root must describe an object.
    pub fn from_value(root: Value) -> Result<Self, SchemaError> {
        let Value::Object(map) = &root else {
            return Err(SchemaError::NotAnObject);
        };

        match map.get("type") {
            None => {}
            Some(Value::String(kind)) if kind == "object" => {}
            Some(other) => {
                let kind = other
                    .as_str()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| other.to_string());
                return Err(SchemaError::RootNotObject(kind));
            }
        }

        let patterns = Patterns::compile(&root)?;
        Ok(Self { root, patterns })
    }

    /// Derive the schema of a Rust type.
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self, SchemaError> {
        let generated = schemars::schema_for!(T);
        let root =
            serde_json::to_value(generated).map_err(|e| SchemaError::Serialize(e.to_string()))?;
        Self::from_value(root)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn title(&self) -> Option<&str> {
        self.root.get("title").and_then(Value::as_str)
    }

    /// Top-level property map, following a root `$ref` when present.
    fn root_properties(&self) -> Option<&Map<String, Value>> {
        let validator = Validator::new(&self.root, &self.patterns);
        validator
            .resolve(&self.root)
            .get("properties")
            .and_then(Value::as_object)
    }
}

impl SchemaModel for SchemaDocument {
    fn validate(&self, value: &Value) -> ValidationOutcome {
        Validator::new(&self.root, &self.patterns).validate(value)
    }

    fn describe(&self) -> SchemaDescription {
        let field_names = self
            .root_properties()
            .map(|properties| properties.keys().cloned().collect())
            .unwrap_or_default();

        SchemaDescription {
            title: self.title().map(ToString::to_string),
            shape: self.root.clone(),
            field_names,
        }
    }

    fn as_partial(&self) -> Box<dyn SchemaModel> {
        Box::new(Self {
            root: partial::relax_root(&self.root),
            patterns: self.patterns.clone(),
        })
    }

    fn canonicalize(&self, value: &Value) -> Value {
        Validator::new(&self.root, &self.patterns).canonicalize(value)
    }

    fn empty_instance(&self) -> Value {
        let fields = self
            .root_properties()
            .map(|properties| {
                properties
                    .keys()
                    .map(|key| (key.clone(), Value::Null))
                    .collect::<Map<String, Value>>()
            })
            .unwrap_or_default();
        Value::Object(fields)
    }
}
