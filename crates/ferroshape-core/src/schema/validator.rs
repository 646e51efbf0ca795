//! Structural JSON Schema walker used for validation and canonical serialization.
//!
//! Every error is collected. Within an object, properties are visited in
//! declaration order (a missing required field is reported where the field is
//! declared) and forbidden extras are reported last in data order. Once a
//! location has the wrong type its children are not inspected.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use super::SchemaError;
use crate::validation::{ErrorKind, FieldError, FieldPath, ValidationOutcome};

/// Bounds `$ref` chains and composition nesting.
const MAX_DEPTH: usize = 128;

/// How a schema treats keys it does not declare.
#[derive(Debug, Clone, Copy)]
enum Additional<'a> {
    Ignore,
    Forbid,
    Allow,
    Schema(&'a Value),
}

fn additional_policy(schema: &Map<String, Value>) -> Additional<'_> {
    match schema.get("additionalProperties") {
        None if schema.contains_key("properties") => Additional::Ignore,
        None => Additional::Allow,
        Some(Value::Bool(false)) => Additional::Forbid,
        Some(Value::Bool(true)) => Additional::Allow,
        Some(nested @ Value::Object(_)) => Additional::Schema(nested),
        Some(_) => Additional::Ignore,
    }
}

/// Keywords whose values are data rather than subschemas.
const DATA_KEYWORDS: [&str; 4] = ["const", "default", "enum", "examples"];

/// Keywords whose values map names to subschemas.
const SCHEMA_MAPS: [&str; 5] = ["properties", "patternProperties", "definitions", "$defs", "dependentSchemas"];

/// Every `pattern` keyword of a document, compiled once and keyed by its source.
#[derive(Debug, Clone, Default)]
pub(crate) struct Patterns(Arc<HashMap<String, Regex>>);

impl Patterns {
    pub(crate) fn compile(root: &Value) -> Result<Self, SchemaError> {
        let mut compiled = HashMap::new();
        collect_patterns(root, &mut compiled)?;
        Ok(Self(Arc::new(compiled)))
    }

    fn get(&self, pattern: &str) -> Option<&Regex> {
        self.0.get(pattern)
    }
}

impl PartialEq for Patterns {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.keys().all(|pattern| other.0.contains_key(pattern))
    }
}

fn collect_patterns(schema: &Value, compiled: &mut HashMap<String, Regex>) -> Result<(), SchemaError> {
    match schema {
        Value::Object(map) => {
            for (keyword, value) in map {
                match (keyword.as_str(), value) {
                    ("pattern", Value::String(pattern)) => {
                        if !compiled.contains_key(pattern) {
                            let regex = Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
                                pattern: pattern.clone(),
                                message: e.to_string(),
                            })?;
                            compiled.insert(pattern.clone(), regex);
                        }
                    }
                    (keyword, Value::Object(named)) if SCHEMA_MAPS.contains(&keyword) => {
                        for nested in named.values() {
                            collect_patterns(nested, compiled)?;
                        }
                    }
                    (keyword, _) if DATA_KEYWORDS.contains(&keyword) => {}
                    (_, nested) => collect_patterns(nested, compiled)?,
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_patterns(item, compiled)?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) struct Validator<'s> {
    root: &'s Value,
    patterns: &'s Patterns,
}

impl<'s> Validator<'s> {
    pub(crate) fn new(root: &'s Value, patterns: &'s Patterns) -> Self {
        Self { root, patterns }
    }

    pub(crate) fn validate(&self, value: &Value) -> ValidationOutcome {
        let mut errors = Vec::new();
        self.validate_value(value, self.root, &FieldPath::root(), 0, &mut errors);
        ValidationOutcome::from_errors(errors)
    }

    pub(crate) fn canonicalize(&self, value: &Value) -> Value {
        self.canonical(value, self.root, 0)
    }

    /// Follows `$ref` until a schema without a resolvable reference is reached.
    pub(crate) fn resolve<'a>(&self, mut schema: &'a Value) -> &'a Value
    where
        's: 'a,
    {
        for _ in 0..MAX_DEPTH {
            let target = schema
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|reference| self.lookup(reference));
            match target {
                Some(target) => schema = target,
                None => break,
            }
        }
        schema
    }

    fn lookup(&self, reference: &str) -> Option<&'s Value> {
        let pointer = reference.strip_prefix('#')?;
        if pointer.is_empty() {
            return Some(self.root);
        }
        self.root.pointer(pointer)
    }

    fn validate_value(
        &self,
        value: &Value,
        schema: &Value,
        path: &FieldPath,
        depth: usize,
        errors: &mut Vec<FieldError>,
    ) {
        if depth > MAX_DEPTH {
            return;
        }

        let schema = match self.resolve(schema) {
            Value::Object(map) => map,
            Value::Bool(false) => {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ValueNotPermitted,
                    "no value is permitted here",
                ));
                return;
            }
            _ => return,
        };

        if let Some(expected) = schema.get("type") {
            if !type_matches(value, expected) {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::TypeMismatch,
                    format!(
                        "expected type '{}', found '{}'",
                        describe_type(expected),
                        value_type_name(value)
                    ),
                ));
                return;
            }
        }

        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.contains(value) {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ValueNotPermitted,
                    format!("value {value} is not one of {}", Value::Array(allowed.clone())),
                ));
                return;
            }
        }

        if let Some(expected) = schema.get("const") {
            if value != expected {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ValueNotPermitted,
                    format!("value {value} must equal {expected}"),
                ));
                return;
            }
        }

        if let Some(Value::Array(branches)) = schema.get("allOf") {
            for branch in branches {
                self.validate_value(value, branch, path, depth + 1, errors);
            }
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = schema.get(keyword) {
                self.validate_alternatives(value, branches, path, depth, errors);
            }
        }

        match value {
            Value::Object(object) => self.validate_object(object, schema, path, depth, errors),
            Value::Array(items) => self.validate_array(items, schema, path, depth, errors),
            Value::String(text) => validate_string(text, schema, self.patterns, path, errors),
            Value::Number(_) => validate_number(value, schema, path, errors),
            Value::Null | Value::Bool(_) => {}
        }
    }

    /// Passes when any branch passes; otherwise reports the branch with the fewest errors.
    fn validate_alternatives(
        &self,
        value: &Value,
        branches: &[Value],
        path: &FieldPath,
        depth: usize,
        errors: &mut Vec<FieldError>,
    ) {
        let mut closest: Option<Vec<FieldError>> = None;
        for branch in branches {
            let mut scratch = Vec::new();
            self.validate_value(value, branch, path, depth + 1, &mut scratch);
            if scratch.is_empty() {
                return;
            }
            if closest
                .as_ref()
                .map_or(true, |best| scratch.len() < best.len())
            {
                closest = Some(scratch);
            }
        }
        if let Some(best) = closest {
            errors.extend(best);
        }
    }

    fn validate_object(
        &self,
        object: &Map<String, Value>,
        schema: &Map<String, Value>,
        path: &FieldPath,
        depth: usize,
        errors: &mut Vec<FieldError>,
    ) {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(properties) = properties {
            for (key, property_schema) in properties {
                match object.get(key) {
                    Some(property_value) => self.validate_value(
                        property_value,
                        property_schema,
                        &path.child(key.as_str()),
                        depth + 1,
                        errors,
                    ),
                    None if required.contains(&key.as_str()) => {
                        errors.push(missing_field(path, key));
                    }
                    None => {}
                }
            }
        }

        for field in &required {
            let declared = properties.is_some_and(|p| p.contains_key(*field));
            if !declared && !object.contains_key(*field) {
                errors.push(missing_field(path, field));
            }
        }

        let is_declared = |key: &str| properties.is_some_and(|p| p.contains_key(key));
        match additional_policy(schema) {
            Additional::Forbid => {
                for key in object.keys().filter(|key| !is_declared(key)) {
                    errors.push(FieldError::new(
                        path.child(key.as_str()),
                        ErrorKind::FieldNotAllowed,
                        format!("extra field '{key}' is not permitted"),
                    ));
                }
            }
            Additional::Schema(extra_schema) => {
                for (key, extra) in object.iter().filter(|(key, _)| !is_declared(key)) {
                    self.validate_value(
                        extra,
                        extra_schema,
                        &path.child(key.as_str()),
                        depth + 1,
                        errors,
                    );
                }
            }
            Additional::Ignore | Additional::Allow => {}
        }
    }

    fn validate_array(
        &self,
        items: &[Value],
        schema: &Map<String, Value>,
        path: &FieldPath,
        depth: usize,
        errors: &mut Vec<FieldError>,
    ) {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ConstraintViolated,
                    format!("array must have at least {min} items, found {}", items.len()),
                ));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ConstraintViolated,
                    format!("array must have at most {max} items, found {}", items.len()),
                ));
            }
        }

        match schema.get("items") {
            Some(Value::Array(positional)) => {
                for (index, (item, item_schema)) in items.iter().zip(positional).enumerate() {
                    self.validate_value(item, item_schema, &path.child(index), depth + 1, errors);
                }
            }
            Some(item_schema) => {
                for (index, item) in items.iter().enumerate() {
                    self.validate_value(item, item_schema, &path.child(index), depth + 1, errors);
                }
            }
            None => {}
        }
    }

    fn canonical(&self, value: &Value, schema: &Value, depth: usize) -> Value {
        if depth > MAX_DEPTH {
            return value.clone();
        }
        let Some(schema) = self.resolve(schema).as_object() else {
            return value.clone();
        };

        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = schema.get(keyword) {
                let matching = branches.iter().find(|branch| {
                    let mut scratch = Vec::new();
                    self.validate_value(value, branch, &FieldPath::root(), depth + 1, &mut scratch);
                    scratch.is_empty()
                });
                if let Some(branch) = matching {
                    return self.canonical(value, branch, depth + 1);
                }
            }
        }
        if let Some(Value::Array(branches)) = schema.get("allOf") {
            if let [single] = branches.as_slice() {
                if !schema.contains_key("properties") {
                    return self.canonical(value, single, depth + 1);
                }
            }
        }

        match value {
            Value::Object(object) => {
                let properties = schema.get("properties").and_then(Value::as_object);
                let mut canonical = Map::new();

                if let Some(properties) = properties {
                    for (key, property_schema) in properties {
                        if let Some(child) = object.get(key) {
                            canonical
                                .insert(key.clone(), self.canonical(child, property_schema, depth + 1));
                        }
                    }
                }

                let policy = additional_policy(schema);
                for (key, child) in object {
                    if properties.is_some_and(|p| p.contains_key(key)) {
                        continue;
                    }
                    match policy {
                        Additional::Allow => {
                            canonical.insert(key.clone(), child.clone());
                        }
                        Additional::Schema(extra_schema) => {
                            canonical.insert(key.clone(), self.canonical(child, extra_schema, depth + 1));
                        }
                        Additional::Ignore | Additional::Forbid => {}
                    }
                }
                Value::Object(canonical)
            }
            Value::Array(items) => match schema.get("items") {
                Some(Value::Array(positional)) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(index, item)| match positional.get(index) {
                            Some(item_schema) => self.canonical(item, item_schema, depth + 1),
                            None => item.clone(),
                        })
                        .collect(),
                ),
                Some(item_schema) => Value::Array(
                    items
                        .iter()
                        .map(|item| self.canonical(item, item_schema, depth + 1))
                        .collect(),
                ),
                None => value.clone(),
            },
            _ => value.clone(),
        }
    }
}

fn missing_field(path: &FieldPath, field: &str) -> FieldError {
    FieldError::new(
        path.child(field),
        ErrorKind::MissingField,
        format!("required field '{field}' is missing"),
    )
}

fn validate_string(
    text: &str,
    schema: &Map<String, Value>,
    patterns: &Patterns,
    path: &FieldPath,
    errors: &mut Vec<FieldError>,
) {
    let length = text.chars().count() as u64;

    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if length < min {
            errors.push(FieldError::new(
                path.clone(),
                ErrorKind::ConstraintViolated,
                format!("string must have at least {min} characters, found {length}"),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if length > max {
            errors.push(FieldError::new(
                path.clone(),
                ErrorKind::ConstraintViolated,
                format!("string must have at most {max} characters, found {length}"),
            ));
        }
    }

    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        if let Some(regex) = patterns.get(pattern) {
            if !regex.is_match(text) {
                errors.push(FieldError::new(
                    path.clone(),
                    ErrorKind::ConstraintViolated,
                    format!("string does not match pattern '{pattern}'"),
                ));
            }
        }
    }
}

fn validate_number(
    value: &Value,
    schema: &Map<String, Value>,
    path: &FieldPath,
    errors: &mut Vec<FieldError>,
) {
    let Some(number) = value.as_f64() else {
        return;
    };

    let bounds: [(&str, fn(f64, f64) -> bool, &str); 4] = [
        ("minimum", |n, bound| n >= bound, "greater than or equal to"),
        ("maximum", |n, bound| n <= bound, "less than or equal to"),
        ("exclusiveMinimum", |n, bound| n > bound, "greater than"),
        ("exclusiveMaximum", |n, bound| n < bound, "less than"),
    ];

    for (keyword, holds, relation) in bounds {
        let Some(bound) = schema.get(keyword) else {
            continue;
        };
        let Some(limit) = bound.as_f64() else {
            continue;
        };
        if !holds(number, limit) {
            errors.push(FieldError::new(
                path.clone(),
                ErrorKind::ConstraintViolated,
                format!("value {value} must be {relation} {bound}"),
            ));
        }
    }
}

fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(kind) => single_type_matches(value, kind),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| single_type_matches(value, kind)),
        _ => true,
    }
}

fn single_type_matches(value: &Value, kind: &str) -> bool {
    match (kind, value) {
        ("object", Value::Object(_)) => true,
        ("array", Value::Array(_)) => true,
        ("string", Value::String(_)) => true,
        ("integer", Value::Number(n)) => n.is_i64() || n.is_u64(),
        ("number", Value::Number(_)) => true,
        ("boolean", Value::Bool(_)) => true,
        ("null", Value::Null) => true,
        _ => false,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(kind) => kind.clone(),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
