//! Validation of incrementally streamed replies.
//!
//! Every chunk is appended to the attempt's buffer, the buffer is closed with
//! [`partial_json::parse`](crate::partial_json::parse) and the result is
//! checked against the full schema. Data that fails is cleaned against the
//! relaxed schema, so consumers always see the best current picture.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cleaner::clean;
use crate::extract::strip_comments;
use crate::partial_json;
use crate::schema::SchemaModel;
use crate::validation::{FieldError, ValidationErrors, ValidationOutcome};

const FENCE_OPEN: &str = "```json";

/// Result of handling one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedChunk {
    pub content: Value,
    pub validation_error: Option<ValidationErrors>,
}

/// One item of a structured stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: Value,
    /// Everything received so far in the current attempt.
    pub raw: String,
    pub validation_error: Option<ValidationErrors>,
    pub retries_remaining: u32,
    pub done: bool,
    /// 1-based attempt this chunk belongs to.
    pub attempt: u32,
    /// Set on the closing chunk of an attempt that is about to be retried.
    pub retrying: bool,
    pub repaired: bool,
}

pub struct StreamValidator<'s> {
    schema: &'s dyn SchemaModel,
    partial: Box<dyn SchemaModel>,
    fenced: bool,
}

impl<'s> StreamValidator<'s> {
    pub fn new(schema: &'s dyn SchemaModel) -> Self {
        Self {
            schema,
            partial: schema.as_partial(),
            fenced: false,
        }
    }

    /// Parse only the text after the first ```` ```json ```` marker.
    pub fn with_fence(mut self, fenced: bool) -> Self {
        self.fenced = fenced;
        self
    }

    /// Appends `chunk` to `accumulated` and validates the result.
    pub fn handle(&self, chunk: &str, accumulated: &mut String) -> ValidatedChunk {
        accumulated.push_str(chunk);

        let candidate = if self.fenced {
            match fenced_body(accumulated) {
                Some(body) => strip_comments(body),
                None => {
                    return ValidatedChunk {
                        content: Value::String(accumulated.clone()),
                        validation_error: Some(ValidationErrors::single(FieldError::extraction(
                            "no ```json code block received yet",
                        ))),
                    }
                }
            }
        } else {
            accumulated.clone()
        };

        match partial_json::parse(&candidate) {
            Ok(value) => match self.schema.validate(&value) {
                ValidationOutcome::Valid => ValidatedChunk {
                    content: self.schema.canonicalize(&value),
                    validation_error: None,
                },
                ValidationOutcome::Invalid(errors) => ValidatedChunk {
                    content: clean(value, self.partial.as_ref()),
                    validation_error: Some(errors),
                },
            },
            Err(error) => ValidatedChunk {
                content: Value::String(accumulated.clone()),
                validation_error: Some(ValidationErrors::single(FieldError::parse(error.to_string()))),
            },
        }
    }
}

/// Text between the opening fence and the closing fence, if it has arrived.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find(FENCE_OPEN)?;
    let body = text[open + FENCE_OPEN.len()..].trim_start_matches(['\r', '\n']);
    Some(match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, SchemaBuilder, SchemaDocument};
    use crate::validation::ErrorKind;
    use serde_json::json;

    fn person() -> SchemaDocument {
        SchemaBuilder::new("Person")
            .required("name", FieldType::String)
            .required("age", FieldType::Integer)
            .build()
            .expect("schema")
    }

    #[test]
    fn chunks_converge_on_the_full_object() {
        let schema = person();
        let validator = StreamValidator::new(&schema);
        let mut buffer = String::new();

        let first = validator.handle("{\"name\":\"J", &mut buffer);
        assert_eq!(first.content, json!({"name": "J"}));
        assert!(first.validation_error.is_some());

        let second = validator.handle("ohn\",\"age\":25", &mut buffer);
        assert_eq!(second.content, json!({"name": "John", "age": 25}));
        assert_eq!(second.validation_error, None);

        let last = validator.handle("}", &mut buffer);
        assert_eq!(last.content, json!({"name": "John", "age": 25}));
        assert_eq!(buffer, "{\"name\":\"John\",\"age\":25}");
    }

    #[test]
    fn unparseable_buffer_is_passed_through_as_text() {
        let schema = person();
        let validator = StreamValidator::new(&schema);
        let mut buffer = String::new();

        let chunk = validator.handle("Sure! ", &mut buffer);
        assert_eq!(chunk.content, json!("Sure! "));
        let errors = chunk.validation_error.expect("parse error");
        assert_eq!(errors.as_slice()[0].kind, ErrorKind::Parse);
    }

    #[test]
    fn fenced_mode_waits_for_the_code_block() {
        let schema = person();
        let validator = StreamValidator::new(&schema).with_fence(true);
        let mut buffer = String::new();

        let thinking = validator.handle("Let me think. ", &mut buffer);
        assert_eq!(
            thinking.validation_error.expect("no block yet").as_slice()[0].kind,
            ErrorKind::Extraction
        );

        let opening = validator.handle("```json\n{\"name\": \"Ada\" // first\n", &mut buffer);
        assert_eq!(opening.content, json!({"name": "Ada"}));

        let closed = validator.handle(", \"age\": 36}\n```\nDone.", &mut buffer);
        assert_eq!(closed.content, json!({"name": "Ada", "age": 36}));
        assert_eq!(closed.validation_error, None);
    }
}
