//! # Ferroshape Core
//!
//! Schema-validated structured output for local chat models.
//!
//! ## Overview
//!
//! A caller supplies a JSON Schema, a chat conversation and a model name. The
//! [`Instructor`] asks the model for JSON, validates the reply and, when it
//! fails, appends the machine-readable errors as guidance and asks again. When
//! the retry budget runs out it either fails or, if allowed, repairs the last
//! reply into a best-effort partial result.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`blocking`] | Synchronous facade on a private runtime |
//! | [`cleaner`] | Repair of invalid data by nulling or deleting offending fields |
//! | [`config`] | Client configuration and per-call options |
//! | [`controller`] | The validation-and-retry loop |
//! | [`envelope`] | Response envelope returned to callers |
//! | [`error`] | Transport and instructor error types |
//! | [`extract`] | Fenced code block and brace-span extraction |
//! | [`message`] | Chat roles, messages and the bounded retry history |
//! | [`partial_json`] | Lenient parser that closes truncated JSON |
//! | [`prompt`] | Output modes, system prompts and error guidance |
//! | [`retry`] | Per-call retry budget |
//! | [`schema`] | JSON Schema model, validator and builder |
//! | [`stream`] | Per-chunk validation of streamed replies |
//! | [`transport`] | Chat transport trait, Ollama HTTP and scripted transports |
//! | [`validation`] | Field paths and validation errors |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferroshape_core::{ChatMessage, FieldType, Instructor, InstructorConfig, RunOptions, SchemaBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Instructor::ollama(InstructorConfig::from_env());
//!     let schema = SchemaBuilder::new("Person")
//!         .required("name", FieldType::String)
//!         .required("age", FieldType::Integer)
//!         .build()?;
//!
//!     let response = client
//!         .run_once(
//!             &schema,
//!             vec![ChatMessage::user("Jason is 30 years old.")],
//!             &RunOptions::new("llama3.1").with_retries(3),
//!         )
//!         .await?;
//!
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```

pub mod blocking;
pub mod cleaner;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod message;
pub mod partial_json;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod stream;
pub mod transport;
pub mod validation;

pub use blocking::BlockingInstructor;
pub use cleaner::clean;
pub use config::{InstructorConfig, RunOptions, DEFAULT_HOST, DEFAULT_RETRIES};
pub use controller::Instructor;
pub use envelope::{ResponseEnvelope, TypedResponse};
pub use error::{InstructorError, TransportError, TransportErrorKind};
pub use extract::{extract, extract_braced, strip_comments, ExtractResult};
pub use message::{ChatHistory, ChatMessage, Role};
pub use partial_json::PartialJsonError;
pub use prompt::OutputMode;
pub use retry::{FailureAction, RetryState};
pub use schema::{FieldType, SchemaBuilder, SchemaDescription, SchemaDocument, SchemaError, SchemaModel};
pub use stream::{StreamChunk, StreamValidator, ValidatedChunk};
pub use transport::{
    ChatChunk, ChatRequest, ChatResponse, ChatTransport, ChunkStream, OllamaTransport, ScriptedReply,
    ScriptedTransport, TransportFuture,
};
pub use validation::{ErrorKind, FieldError, FieldPath, PathSegment, ValidationErrors, ValidationOutcome};
