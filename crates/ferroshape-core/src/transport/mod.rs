//! Chat transport contract and request/response types.
//!
//! | Implementation | Description |
//! |----------------|-------------|
//! | [`OllamaTransport`] | HTTP client for an Ollama-compatible `/api/chat` endpoint |
//! | [`ScriptedTransport`] | Deterministic offline replay for tests and examples |
//!
//! # Example
//!
//! ```rust
//! use ferroshape_core::{ChatMessage, ChatRequest, ChatTransport, ScriptedTransport};
//!
//! # tokio_test_block(async {
//! let transport = ScriptedTransport::new().with_response(r#"{"name": "Ada"}"#);
//! let request = ChatRequest::new("llama3", vec![ChatMessage::user("Who?")]);
//!
//! let response = transport.chat(request).await.expect("scripted reply");
//! assert_eq!(response.message.content, r#"{"name": "Ada"}"#);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(future: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
//! # }
//! ```

mod ollama;
mod scripted;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::message::ChatMessage;

pub use ollama::OllamaTransport;
pub use scripted::{ScriptedReply, ScriptedTransport};

/// Boxed future returned by transport calls.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Incremental response of a streamed chat call.
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<ChatChunk, TransportError>> + Send + 'a>>;

/// A chat call. Serializes as the body of an Ollama `/api/chat` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// `"json"`, a JSON schema document, or absent for free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    /// Model options such as `temperature`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            format: None,
            stream: false,
            options: Map::new(),
            keep_alive: None,
        }
    }

    pub fn with_format(mut self, format: Option<Value>) -> Self {
        self.format = format;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Option<String>) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

/// A complete, non-streamed chat reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
}

impl ChatResponse {
    pub fn new(model: impl Into<String>, message: ChatMessage) -> Self {
        Self {
            model: model.into(),
            created_at: None,
            message,
            done: true,
        }
    }
}

/// One fragment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub content: String,
    pub done: bool,
}

impl ChatChunk {
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn last(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: true,
        }
    }
}

/// Chat backend contract.
pub trait ChatTransport: Send + Sync {
    fn chat<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChatResponse>;

    /// Opens a streamed reply. Connection and status failures surface from the
    /// returned future; failures mid-stream surface as stream items.
    fn chat_stream<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChunkStream<'a>>;
}
