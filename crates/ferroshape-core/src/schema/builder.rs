use serde_json::{json, Map, Value};

use super::{SchemaDocument, SchemaError};

/// Field type accepted by [`SchemaBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// Homogeneous list.
    Array(Box<FieldType>),
    /// Nested object built with its own builder.
    Object(SchemaBuilder),
    /// One of a fixed set of strings.
    Enum(Vec<String>),
    /// Any JSON schema fragment.
    Raw(Value),
}

impl FieldType {
    pub fn array_of(item: FieldType) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(item) => json!({"type": "array", "items": item.to_schema()}),
            Self::Object(builder) => builder.to_value(),
            Self::Enum(values) => json!({"type": "string", "enum": values}),
            Self::Raw(schema) => schema.clone(),
        }
    }
}

/// Fluent builder for object schemas.
///
/// Optional fields are declared nullable and left out of `required`.
///
/// # Example
///
/// ```rust
/// use ferroshape_core::{FieldType, SchemaBuilder};
///
/// let schema = SchemaBuilder::new("Order")
///     .required("id", FieldType::String)
///     .required("items", FieldType::array_of(FieldType::String))
///     .optional("note", FieldType::String)
///     .forbid_additional()
///     .build()?;
///
/// assert_eq!(schema.title(), Some("Order"));
/// # Ok::<(), ferroshape_core::SchemaError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBuilder {
    title: String,
    description: Option<String>,
    properties: Map<String, Value>,
    required: Vec<String>,
    additional: Option<bool>,
}

impl SchemaBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            properties: Map::new(),
            required: Vec::new(),
            additional: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self, name: impl Into<String>, field: FieldType) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), field.to_schema());
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn optional(mut self, name: impl Into<String>, field: FieldType) -> Self {
        let name = name.into();
        let schema = match field.to_schema() {
            Value::Object(mut map) => match map.get("type").cloned() {
                Some(Value::String(kind)) => {
                    map.insert("type".to_string(), json!([kind, "null"]));
                    Value::Object(map)
                }
                _ => json!({"anyOf": [Value::Object(map), {"type": "null"}]}),
            },
            other => other,
        };
        self.required.retain(|existing| existing != &name);
        self.properties.insert(name, schema);
        self
    }

    /// Adds a keyword (such as `minimum` or `minLength`) to an already declared field.
    pub fn constraint(mut self, name: &str, keyword: &str, value: Value) -> Self {
        if let Some(Value::Object(field)) = self.properties.get_mut(name) {
            field.insert(keyword.to_string(), value);
        }
        self
    }

    /// Rejects undeclared keys with `FieldNotAllowed`.
    pub fn forbid_additional(mut self) -> Self {
        self.additional = Some(false);
        self
    }

    /// Keeps undeclared keys through canonicalization.
    pub fn allow_additional(mut self) -> Self {
        self.additional = Some(true);
        self
    }

    fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("title".to_string(), Value::String(self.title.clone()));
        if let Some(description) = &self.description {
            root.insert("description".to_string(), Value::String(description.clone()));
        }
        root.insert("type".to_string(), Value::String("object".to_string()));
        root.insert("properties".to_string(), Value::Object(self.properties.clone()));
        if !self.required.is_empty() {
            root.insert("required".to_string(), json!(self.required));
        }
        if let Some(additional) = self.additional {
            root.insert("additionalProperties".to_string(), Value::Bool(additional));
        }
        Value::Object(root)
    }

    /// Fails when a `pattern` constraint is not a valid regular expression.
    pub fn build(self) -> Result<SchemaDocument, SchemaError> {
        SchemaDocument::from_value(self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaModel;

    #[test]
    fn builds_nested_document() {
        let schema = SchemaBuilder::new("Person")
            .description("A person")
            .required("name", FieldType::String)
            .optional("age", FieldType::Integer)
            .constraint("age", "minimum", json!(0))
            .required(
                "pet",
                FieldType::Object(
                    SchemaBuilder::new("Pet").required("kind", FieldType::one_of(["cat", "dog"])),
                ),
            )
            .forbid_additional()
            .build()
            .expect("schema");

        let root = schema.as_value();
        assert_eq!(root["required"], json!(["name", "pet"]));
        assert_eq!(root["properties"]["age"]["type"], json!(["integer", "null"]));
        assert_eq!(root["properties"]["age"]["minimum"], 0);
        assert_eq!(root["properties"]["pet"]["properties"]["kind"]["enum"], json!(["cat", "dog"]));
        assert_eq!(root["additionalProperties"], false);

        assert!(schema
            .validate(&json!({"name": "Ada", "age": null, "pet": {"kind": "cat"}}))
            .is_valid());
        assert!(!schema
            .validate(&json!({"name": "Ada", "age": -1, "pet": {"kind": "cat"}}))
            .is_valid());
    }

    #[test]
    fn optional_replaces_an_earlier_required_declaration() {
        let schema = SchemaBuilder::new("Note")
            .required("body", FieldType::String)
            .optional("body", FieldType::String)
            .build()
            .expect("schema");
        assert!(schema.as_value().get("required").is_none());
    }

    #[test]
    fn pattern_constraints_are_checked_at_build_time() {
        let schema = SchemaBuilder::new("Flight")
            .required("code", FieldType::String)
            .constraint("code", "pattern", json!("^[A-Z]{2}[0-9]+$"))
            .build()
            .expect("valid pattern");
        assert!(schema.validate(&json!({"code": "LH400"})).is_valid());
        assert!(!schema.validate(&json!({"code": "lh400"})).is_valid());

        let error = SchemaBuilder::new("Flight")
            .required("code", FieldType::String)
            .constraint("code", "pattern", json!("[A-Z"))
            .build()
            .expect_err("unclosed class");
        assert!(matches!(error, SchemaError::InvalidPattern { .. }));
    }
}
