//! Results returned to callers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InstructorError;
use crate::message::ChatMessage;
use crate::validation::ValidationErrors;

/// Outcome of a successful structured chat call.
///
/// `validation_error` is `None` when `content` passed the full schema. When the
/// retry budget ran out and repair was allowed, `repaired` is set and the
/// error that triggered the repair is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub content: Value,
    /// Model output of the final attempt, before extraction.
    pub raw: String,
    pub validation_error: Option<ValidationErrors>,
    pub retries_remaining: u32,
    pub model: String,
    /// The assistant message as received.
    pub message: ChatMessage,
    pub attempts: u32,
    pub repaired: bool,
}

impl ResponseEnvelope {
    /// Deserializes `content` into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<TypedResponse<T>, InstructorError> {
        let value = serde_json::from_value(self.content.clone())?;
        Ok(TypedResponse {
            value,
            envelope: self,
        })
    }
}

/// A [`ResponseEnvelope`] together with its content decoded as `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResponse<T> {
    pub value: T,
    pub envelope: ResponseEnvelope,
}

impl<T> TypedResponse<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Person {
        name: String,
        age: Option<u32>,
    }

    fn envelope(content: Value) -> ResponseEnvelope {
        ResponseEnvelope {
            raw: content.to_string(),
            message: ChatMessage::assistant(content.to_string()),
            content,
            validation_error: None,
            retries_remaining: 3,
            model: "llama3".to_string(),
            attempts: 1,
            repaired: false,
        }
    }

    #[test]
    fn typed_decoding_tolerates_missing_optional_fields() {
        let typed = envelope(json!({"name": "Ada"}))
            .into_typed::<Person>()
            .expect("decode");
        assert_eq!(
            typed.value,
            Person {
                name: "Ada".to_string(),
                age: None
            }
        );
        assert_eq!(typed.envelope.retries_remaining, 3);
    }

    #[test]
    fn typed_decoding_failure_is_a_decode_error() {
        let error = envelope(json!({"name": null}))
            .into_typed::<Person>()
            .expect_err("name is required");
        assert!(matches!(error, InstructorError::Decode(_)));
    }
}
