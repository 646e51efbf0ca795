//! Derivation of the relaxed schema used for best-effort repair.
//!
//! Nothing is required and every nested value may be `null`, recursively
//! through properties, array items, additional-property schemas, composition
//! branches and local definitions. `additionalProperties: false` is kept, so
//! extra keys are still reported and the cleaner deletes them.

use serde_json::{json, Map, Value};

/// Relaxes a document root. The root itself stays non-nullable.
pub(super) fn relax_root(root: &Value) -> Value {
    let Value::Object(map) = root else {
        return root.clone();
    };

    Value::Object(relax_structure(map))
}

/// Relaxed and nullable: used wherever a value sits inside a parent.
fn relax_nullable(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => make_nullable(relax_structure(map)),
        other => other.clone(),
    }
}

/// Relaxed but not nullable: used for definitions and composition branches,
/// whose referencing site adds nullability.
fn relax_inner(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(relax_structure(map)),
        other => other.clone(),
    }
}

fn relax_structure(map: &Map<String, Value>) -> Map<String, Value> {
    let mut relaxed = Map::with_capacity(map.len());

    for (keyword, value) in map {
        let rewritten = match (keyword.as_str(), value) {
            ("required", _) => continue,
            ("minItems", _) => continue,
            ("definitions" | "$defs", Value::Object(definitions)) => Value::Object(
                definitions
                    .iter()
                    .map(|(name, schema)| (name.clone(), relax_inner(schema)))
                    .collect(),
            ),
            ("properties", Value::Object(properties)) => Value::Object(
                properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), relax_nullable(schema)))
                    .collect(),
            ),
            ("items", Value::Array(positional)) => {
                Value::Array(positional.iter().map(relax_nullable).collect())
            }
            ("items" | "additionalProperties", nested @ Value::Object(_)) => relax_nullable(nested),
            ("anyOf" | "oneOf" | "allOf", Value::Array(branches)) => {
                Value::Array(branches.iter().map(relax_inner).collect())
            }
            _ => value.clone(),
        };
        relaxed.insert(keyword.clone(), rewritten);
    }

    relaxed
}

fn make_nullable(mut map: Map<String, Value>) -> Value {
    if map.is_empty() {
        return Value::Object(map);
    }
    if map.contains_key("const") || map.contains_key("allOf") {
        return wrap_nullable(map);
    }

    let has_enum = map.contains_key("enum");
    if let Some(Value::Array(allowed)) = map.get_mut("enum") {
        if !allowed.contains(&Value::Null) {
            allowed.push(Value::Null);
        }
    }

    let widened = match map.get("type").cloned() {
        Some(Value::String(kind)) if kind == "null" => None,
        Some(Value::String(kind)) => Some(json!([kind, "null"])),
        Some(Value::Array(kinds)) if kinds.iter().any(|kind| kind == "null") => None,
        Some(Value::Array(mut kinds)) => {
            kinds.push(Value::String("null".to_string()));
            Some(Value::Array(kinds))
        }
        Some(_) => None,
        None if has_enum => None,
        None => return nullable_alternatives(map),
    };

    if let Some(widened) = widened {
        map.insert("type".to_string(), widened);
    }
    Value::Object(map)
}

fn nullable_alternatives(mut map: Map<String, Value>) -> Value {
    let keyword = ["anyOf", "oneOf"]
        .into_iter()
        .find(|keyword| map.get(*keyword).is_some_and(Value::is_array));

    match keyword {
        Some(keyword) => {
            if let Some(Value::Array(branches)) = map.get_mut(keyword) {
                if !branches.iter().any(is_null_schema) {
                    branches.push(json!({"type": "null"}));
                }
            }
            Value::Object(map)
        }
        None => wrap_nullable(map),
    }
}

fn wrap_nullable(map: Map<String, Value>) -> Value {
    if map.is_empty() {
        return Value::Object(map);
    }
    json!({"anyOf": [Value::Object(map), {"type": "null"}]})
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
}
