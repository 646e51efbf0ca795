//! The validation-and-repair loop.
//!
//! Each call owns an [`Exchange`]: a fresh history, a fresh [`RetryState`] and
//! the resolved per-call settings. One reply is judged by [`Exchange::assess`],
//! which the one-shot and the streamed paths share:
//!
//! ```text
//! reply ──► extract ──► parse ──► validate ──┬─ valid ─────────────────► Success
//!                                            └─ invalid ─► record_failure
//!                                                  ├─ Retry ──► guidance appended, ask again
//!                                                  ├─ LastAttempt + allow_partial ─► clean ─► Success
//!                                                  └─ otherwise ──► RetriesExhausted
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn};

use crate::cleaner::clean;
use crate::config::{InstructorConfig, RunOptions};
use crate::envelope::{ResponseEnvelope, TypedResponse};
use crate::error::{InstructorError, TransportError};
use crate::extract::{extract, extract_braced, ExtractResult};
use crate::message::{ChatHistory, ChatMessage};
use crate::prompt::{self, OutputMode};
use crate::retry::{FailureAction, RetryState};
use crate::schema::{SchemaDescription, SchemaDocument, SchemaModel};
use crate::stream::{StreamChunk, StreamValidator};
use crate::transport::{ChatChunk, ChatRequest, ChatTransport, ChunkStream, OllamaTransport};
use crate::validation::{FieldError, ValidationErrors, ValidationOutcome};

/// Structured chat client.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Instructor {
    transport: Arc<dyn ChatTransport>,
    config: InstructorConfig,
}

impl std::fmt::Debug for Instructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instructor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Instructor {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            config: InstructorConfig::default(),
        }
    }

    /// Client talking HTTP to `config.host`.
    pub fn ollama(config: InstructorConfig) -> Self {
        Self {
            transport: Arc::new(OllamaTransport::from_config(&config)),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::ollama(InstructorConfig::from_env())
    }

    pub fn with_config(mut self, config: InstructorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &InstructorConfig {
        &self.config
    }

    /// Requests a reply and validates it, retrying with corrective guidance
    /// until the reply passes or the budget runs out.
    pub async fn run_once(
        &self,
        schema: &dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
    ) -> Result<ResponseEnvelope, InstructorError> {
        let mut exchange = Exchange::start(schema, messages, options, &self.config)?;
        let timeout = options.resolved_timeout(&self.config);

        loop {
            let request = exchange.request(false);
            let response = match with_timeout(timeout, self.transport.chat(request)).await {
                Ok(response) => response,
                Err(transport_error) => {
                    error!(code = transport_error.code(), error = %transport_error, "chat request failed");
                    return Err(transport_error.into());
                }
            };

            let model = response.model.clone();
            match exchange.assess(response.message.content) {
                Decision::Success(envelope) => return Ok(envelope.with_model(model)),
                Decision::Retry(_) => continue,
                Decision::Fatal(failure) => return Err(failure),
            }
        }
    }

    /// [`run_once`](Self::run_once) against the schema derived from `T`.
    pub async fn run_once_typed<T>(
        &self,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
    ) -> Result<TypedResponse<T>, InstructorError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = SchemaDocument::for_type::<T>()?;
        self.run_once(&schema, messages, options).await?.into_typed()
    }

    /// Streams validated snapshots of the reply.
    ///
    /// Each chunk carries the best current content and the full-schema error,
    /// if any. The final chunk has `done` set and the same content
    /// [`run_once`](Self::run_once) would return. A failed attempt ends with a
    /// `retrying` chunk and the next attempt's chunks follow.
    pub fn run_stream<'a>(
        &'a self,
        schema: &'a dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &'a RunOptions,
    ) -> impl Stream<Item = Result<StreamChunk, InstructorError>> + Send + 'a {
        let timeout = options.resolved_timeout(&self.config);
        let phase = match Exchange::start(schema, messages, options, &self.config) {
            Ok(exchange) => StreamPhase::Connecting(exchange),
            Err(failure) => StreamPhase::Failed(failure),
        };

        stream::unfold(phase, move |phase| async move {
            let mut phase = phase;
            loop {
                match phase {
                    StreamPhase::Finished => return None,
                    StreamPhase::Failed(failure) => return Some((Err(failure), StreamPhase::Finished)),
                    StreamPhase::Connecting(exchange) => {
                        let request = exchange.request(true);
                        match with_timeout(timeout, self.transport.chat_stream(request)).await {
                            Ok(chunks) => {
                                let validator =
                                    StreamValidator::new(exchange.schema).with_fence(exchange.mode.requires_fence());
                                phase = StreamPhase::Streaming {
                                    exchange,
                                    validator,
                                    chunks,
                                    buffer: String::new(),
                                };
                            }
                            Err(transport_error) => {
                                error!(code = transport_error.code(), error = %transport_error, "chat stream failed to open");
                                return Some((Err(transport_error.into()), StreamPhase::Finished));
                            }
                        }
                    }
                    StreamPhase::Streaming {
                        mut exchange,
                        validator,
                        mut chunks,
                        mut buffer,
                    } => {
                        let next = match with_timeout(timeout, next_chunk(&mut chunks)).await {
                            Ok(next) => next,
                            Err(transport_error) => {
                                error!(code = transport_error.code(), error = %transport_error, "chat stream failed");
                                return Some((Err(transport_error.into()), StreamPhase::Finished));
                            }
                        };

                        // A stream that ends without a done marker is treated as complete.
                        let (content, done) = match next {
                            Some(chunk) => (chunk.content, chunk.done),
                            None => (String::new(), true),
                        };

                        let validated = validator.handle(&content, &mut buffer);
                        if !done {
                            let item = StreamChunk {
                                content: validated.content,
                                raw: buffer.clone(),
                                validation_error: validated.validation_error,
                                retries_remaining: exchange.retries_remaining(),
                                done: false,
                                attempt: exchange.attempt(),
                                retrying: false,
                                repaired: false,
                            };
                            let phase = StreamPhase::Streaming {
                                exchange,
                                validator,
                                chunks,
                                buffer,
                            };
                            return Some((Ok(item), phase));
                        }

                        let attempt = exchange.attempt();
                        match exchange.assess(buffer.clone()) {
                            Decision::Success(envelope) => {
                                info!(attempt, retries_remaining = envelope.retries_remaining, "stream completed");
                                let item = StreamChunk {
                                    content: envelope.content,
                                    raw: envelope.raw,
                                    validation_error: envelope.validation_error,
                                    retries_remaining: envelope.retries_remaining,
                                    done: true,
                                    attempt,
                                    retrying: false,
                                    repaired: envelope.repaired,
                                };
                                return Some((Ok(item), StreamPhase::Finished));
                            }
                            Decision::Retry(errors) => {
                                let item = StreamChunk {
                                    content: validated.content,
                                    raw: buffer,
                                    validation_error: Some(errors),
                                    retries_remaining: exchange.retries_remaining(),
                                    done: false,
                                    attempt,
                                    retrying: true,
                                    repaired: false,
                                };
                                return Some((Ok(item), StreamPhase::Connecting(exchange)));
                            }
                            Decision::Fatal(failure) => return Some((Err(failure), StreamPhase::Finished)),
                        }
                    }
                }
            }
        })
    }
}

async fn next_chunk(chunks: &mut ChunkStream<'_>) -> Result<Option<ChatChunk>, TransportError> {
    chunks.next().await.transpose()
}

async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(TransportError::timeout(format!(
                "no response within {} ms",
                limit.as_millis()
            )))
        }),
        None => call.await,
    }
}

enum StreamPhase<'a> {
    Connecting(Exchange<'a>),
    Streaming {
        exchange: Exchange<'a>,
        validator: StreamValidator<'a>,
        chunks: ChunkStream<'a>,
        buffer: String,
    },
    Failed(InstructorError),
    Finished,
}

/// Verdict on one reply.
#[derive(Debug)]
pub(crate) enum Decision {
    Success(ResponseEnvelope),
    /// Guidance was appended; the carried errors caused the retry.
    Retry(ValidationErrors),
    Fatal(InstructorError),
}

/// State of one top-level call.
pub(crate) struct Exchange<'s> {
    schema: &'s dyn SchemaModel,
    description: SchemaDescription,
    mode: OutputMode,
    history: ChatHistory,
    state: RetryState,
    allow_partial: bool,
    model: String,
    options: Map<String, Value>,
    keep_alive: Option<String>,
}

impl<'s> Exchange<'s> {
    pub(crate) fn start(
        schema: &'s dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
        config: &InstructorConfig,
    ) -> Result<Self, InstructorError> {
        if messages.is_empty() {
            return Err(InstructorError::InvalidRequest(
                "at least one message is required".to_string(),
            ));
        }
        if options.model.trim().is_empty() {
            return Err(InstructorError::InvalidRequest(
                "model name must not be empty".to_string(),
            ));
        }

        let mode = options.resolved_mode(config);
        let retries = options.resolved_retries(config);
        let description = schema.describe();
        let history = ChatHistory::new(prompt::seed_messages(mode, &description, messages));

        info!(
            model = %options.model,
            mode = %mode,
            retries,
            allow_partial = options.allow_partial,
            "starting structured chat"
        );

        Ok(Self {
            schema,
            description,
            mode,
            history,
            state: RetryState::new(retries),
            allow_partial: options.allow_partial,
            model: options.model.clone(),
            options: options.options.clone(),
            keep_alive: options.keep_alive.clone(),
        })
    }

    pub(crate) fn retries_remaining(&self) -> u32 {
        self.state.retries_remaining()
    }

    /// 1-based number of the attempt in flight.
    pub(crate) fn attempt(&self) -> u32 {
        self.state.attempts() + 1
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub(crate) fn request(&self, stream: bool) -> ChatRequest {
        let messages = self.history.window();
        debug!(attempt = self.attempt(), messages = messages.len(), stream, "requesting reply");
        trace!(?messages, "request window");

        ChatRequest::new(self.model.clone(), messages)
            .with_format(self.mode.request_format(&self.description))
            .with_stream(stream)
            .with_options(self.options.clone())
            .with_keep_alive(self.keep_alive.clone())
    }

    /// Judges one complete reply and updates history and budget.
    pub(crate) fn assess(&mut self, raw: String) -> Decision {
        trace!(%raw, "assessing reply");
        self.state.record_attempt();

        let (recorded, parsed) = self.interpret(&raw);
        let outcome = match &parsed {
            Ok(value) => self.schema.validate(value),
            Err(failure) => ValidationOutcome::Invalid(ValidationErrors::single(failure.clone())),
        };

        let errors = match outcome {
            ValidationOutcome::Valid => {
                let content = match &parsed {
                    Ok(value) => self.schema.canonicalize(value),
                    Err(_) => Value::Null,
                };
                debug!(attempts = self.state.attempts(), "reply accepted");
                self.history.push(ChatMessage::assistant(recorded));
                return Decision::Success(self.envelope(content, raw, None, false));
            }
            ValidationOutcome::Invalid(errors) => errors,
        };

        debug!(attempts = self.state.attempts(), errors = %errors, "reply rejected");
        match self.state.record_failure(errors.clone()) {
            FailureAction::Retry => {
                info!(
                    retries_remaining = self.state.retries_remaining(),
                    errors = errors.len(),
                    "validation failed, retrying"
                );
                self.history.push(ChatMessage::assistant(recorded));
                self.history.push(prompt::error_guidance(self.mode, &errors));
                Decision::Retry(errors)
            }
            FailureAction::LastAttempt if self.allow_partial => {
                warn!(attempts = self.state.attempts(), errors = %errors, "retries spent, repairing partial reply");
                let data = parsed
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let partial = self.schema.as_partial();
                let content = clean(data, partial.as_ref());
                self.history.push(ChatMessage::assistant(recorded));
                Decision::Success(self.envelope(content, raw, Some(errors), true))
            }
            FailureAction::LastAttempt | FailureAction::Exhausted => {
                warn!(attempts = self.state.attempts(), errors = %errors, "retries exhausted");
                Decision::Fatal(InstructorError::RetriesExhausted {
                    attempts: self.state.attempts(),
                    last_error: errors,
                })
            }
        }
    }

    /// Returns the assistant text to record in history and the parsed payload.
    fn interpret(&self, raw: &str) -> (String, Result<Value, FieldError>) {
        let text = match self.mode {
            OutputMode::Json | OutputMode::Schema => extract_braced(raw).unwrap_or(raw).to_string(),
            OutputMode::Reasoning => match extract(raw) {
                ExtractResult::Found(text) if text.trim() == "{}" => {
                    let empty = self.schema.empty_instance();
                    debug!("empty code block replaced by null-filled instance");
                    return (format!("```json\n{empty}\n```"), Ok(empty));
                }
                ExtractResult::Found(text) => text,
                ExtractResult::FenceMissing => {
                    warn!("reply has no ```json code block");
                    return (
                        raw.to_string(),
                        Err(FieldError::extraction("no ```json code block found in the response")),
                    );
                }
                ExtractResult::FenceUnterminated => {
                    warn!("reply has an unterminated ```json code block");
                    return (
                        raw.to_string(),
                        Err(FieldError::extraction("the ```json code block is not closed")),
                    );
                }
            },
        };

        let parsed = serde_json::from_str::<Value>(&text)
            .map_err(|e| FieldError::parse(format!("invalid JSON: {e}")));
        (raw.to_string(), parsed)
    }

    fn envelope(
        &self,
        content: Value,
        raw: String,
        validation_error: Option<ValidationErrors>,
        repaired: bool,
    ) -> ResponseEnvelope {
        ResponseEnvelope {
            content,
            message: ChatMessage::assistant(raw.clone()),
            raw,
            validation_error,
            retries_remaining: self.state.retries_remaining(),
            model: self.model.clone(),
            attempts: self.state.attempts(),
            repaired,
        }
    }
}

impl ResponseEnvelope {
    /// Prefers the model name the server reported.
    fn with_model(mut self, model: String) -> Self {
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, SchemaBuilder};
    use crate::validation::ErrorKind;
    use crate::Role;
    use serde_json::json;

    fn person() -> SchemaDocument {
        SchemaBuilder::new("Person")
            .required("name", FieldType::String)
            .required("age", FieldType::Integer)
            .build()
            .expect("schema")
    }

    fn exchange<'s>(schema: &'s SchemaDocument, options: &RunOptions) -> Exchange<'s> {
        Exchange::start(
            schema,
            vec![ChatMessage::user("Tell me about John, 25.")],
            options,
            &InstructorConfig::default(),
        )
        .expect("valid request")
    }

    #[test]
    fn start_rejects_empty_messages_and_model() {
        let schema = person();
        let config = InstructorConfig::default();

        let error = Exchange::start(&schema, Vec::new(), &RunOptions::new("llama3"), &config)
            .err()
            .expect("no messages");
        assert!(matches!(error, InstructorError::InvalidRequest(_)));

        let error = Exchange::start(&schema, vec![ChatMessage::user("hi")], &RunOptions::new("  "), &config)
            .err()
            .expect("no model");
        assert!(matches!(error, InstructorError::InvalidRequest(_)));
    }

    #[test]
    fn retry_appends_reply_and_guidance() {
        let schema = person();
        let mut exchange = exchange(&schema, &RunOptions::new("llama3").with_retries(2));

        let decision = exchange.assess(r#"{"name": "John"}"#.to_string());
        assert!(matches!(decision, Decision::Retry(_)));
        assert_eq!(exchange.retries_remaining(), 1);
        assert_eq!(exchange.attempt(), 2);

        let messages = exchange.history().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].role, Role::System);
        assert!(messages[3].content.contains("missing_field"));
    }

    #[test]
    fn json_mode_reads_the_braced_span() {
        let schema = person();
        let mut exchange = exchange(&schema, &RunOptions::new("llama3"));

        let decision = exchange.assess("Here you go: {\"age\": 25, \"name\": \"John\"} Enjoy!".to_string());
        let Decision::Success(envelope) = decision else {
            panic!("expected success");
        };
        assert_eq!(envelope.content, json!({"name": "John", "age": 25}));
        assert_eq!(envelope.retries_remaining, 3);
        assert_eq!(envelope.attempts, 1);
    }

    #[test]
    fn reasoning_mode_replaces_empty_block_with_null_instance() {
        let schema = person();
        let options = RunOptions::new("llama3")
            .with_mode(OutputMode::Reasoning)
            .with_retries(2);
        let mut exchange = exchange(&schema, &options);

        let decision = exchange.assess("Nothing found.\n```json\n{}\n```".to_string());
        let Decision::Retry(errors) = decision else {
            panic!("nulls do not satisfy required fields");
        };
        assert!(errors.iter().all(|error| error.kind == ErrorKind::TypeMismatch));

        let recorded = &exchange.history().messages()[2];
        assert!(recorded.content.contains("\"name\":null"));
        assert!(recorded.content.starts_with("```json\n"));
    }

    #[test]
    fn reasoning_mode_without_fence_spends_budget() {
        let schema = person();
        let options = RunOptions::new("llama3")
            .with_mode(OutputMode::Reasoning)
            .with_retries(2);
        let mut exchange = exchange(&schema, &options);

        let decision = exchange.assess(r#"{"name": "John", "age": 25}"#.to_string());
        let Decision::Retry(errors) = decision else {
            panic!("expected retry");
        };
        assert_eq!(errors.as_slice()[0].kind, ErrorKind::Extraction);
        assert_eq!(exchange.retries_remaining(), 1);
    }

    #[test]
    fn unparseable_reply_is_repaired_to_empty_object() {
        let schema = person();
        let options = RunOptions::new("llama3").with_retries(1).allow_partial(true);
        let mut exchange = exchange(&schema, &options);

        let Decision::Success(envelope) = exchange.assess("no json here".to_string()) else {
            panic!("expected repaired success");
        };
        assert!(envelope.repaired);
        assert_eq!(envelope.content, json!({}));
        assert_eq!(
            envelope.validation_error.expect("kept error").as_slice()[0].kind,
            ErrorKind::Parse
        );
    }
}
