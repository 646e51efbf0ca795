//! Best-effort repair of data that failed validation.
//!
//! Works best against a partial schema (see [`SchemaModel::as_partial`]):
//! every location the validator reports can then be satisfied by `null`, so a
//! single pass leaves data the partial schema accepts.

use serde_json::Value;

use crate::schema::SchemaModel;
use crate::validation::{ErrorKind, FieldError, PathSegment, ValidationOutcome};

/// Validates `data` and repairs it in place of raising.
///
/// Valid data is returned in canonical form. Invalid data has each reported
/// error applied in order: forbidden extra fields are deleted, every other
/// failing location is set to `null`. Root-level errors are left alone.
pub fn clean(data: Value, schema: &dyn SchemaModel) -> Value {
    match schema.validate(&data) {
        ValidationOutcome::Valid => schema.canonicalize(&data),
        ValidationOutcome::Invalid(errors) => {
            let mut data = data;
            for error in &errors {
                apply(&mut data, error);
            }
            tracing::trace!(repaired = %data, "cleaned invalid data");
            data
        }
    }
}

fn apply(data: &mut Value, error: &FieldError) {
    let Some((last, parents)) = error.path.split_last() else {
        return;
    };
    let Some(parent) = navigate(data, parents) else {
        return;
    };

    let remove = error.kind == ErrorKind::FieldNotAllowed;
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            if remove {
                map.shift_remove(key);
            } else {
                map.insert(key.clone(), Value::Null);
            }
        }
        (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
            if remove {
                items.remove(*index);
            } else {
                items[*index] = Value::Null;
            }
        }
        _ => {}
    }
}

fn navigate<'v>(mut current: &'v mut Value, segments: &[PathSegment]) -> Option<&'v mut Value> {
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}
