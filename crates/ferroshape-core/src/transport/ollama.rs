use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::{ChatChunk, ChatRequest, ChatResponse, ChatTransport, ChunkStream, TransportFuture};
use crate::config::InstructorConfig;
use crate::error::TransportError;

/// HTTP transport for an Ollama-compatible server.
#[derive(Debug, Clone)]
pub struct OllamaTransport {
    client: Arc<reqwest::Client>,
    host: String,
}

impl OllamaTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("ferroshape/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
            host: host.into(),
        }
    }

    pub fn from_config(config: &InstructorConfig) -> Self {
        Self::new(config.host.clone())
    }

    /// Use a preconfigured reqwest client (proxies, TLS, connect timeouts).
    pub fn with_client(client: reqwest::Client, host: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.host.trim_end_matches('/'))
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, TransportError> {
        let endpoint = self.endpoint();
        tracing::debug!(%endpoint, model = %request.model, stream = request.stream, "sending chat request");

        let response = self
            .client
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::status(status.as_u16(), error_detail(&body)));
        }
        Ok(response)
    }
}

impl Default for OllamaTransport {
    fn default() -> Self {
        Self::from_config(&InstructorConfig::default())
    }
}

impl ChatTransport for OllamaTransport {
    fn chat<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChatResponse> {
        Box::pin(async move {
            let request = request.with_stream(false);
            let response = self.send(&request).await?;
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::protocol(format!("failed to read response body: {e}")))?;

            serde_json::from_str::<ChatResponse>(&body)
                .map_err(|e| TransportError::protocol(format!("undecodable chat response: {e}")))
        })
    }

    fn chat_stream<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChunkStream<'a>> {
        Box::pin(async move {
            let request = request.with_stream(true);
            let response = self.send(&request).await?;
            let bytes = response
                .bytes_stream()
                .map(|item| item.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error));

            let chunks: ChunkStream<'a> = Box::pin(ndjson_chunks(Box::pin(bytes)));
            Ok(chunks)
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(format!("request timeout: {error}"))
    } else if error.is_connect() {
        TransportError::connect(format!("connection failed: {error}"))
    } else if error.is_decode() || error.is_body() {
        TransportError::protocol(format!("malformed response: {error}"))
    } else {
        TransportError::connect(format!("request failed: {error}"))
    }
}

/// Ollama reports failures as `{"error": "..."}`.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

fn decode_line(line: &[u8]) -> Result<ChatChunk, TransportError> {
    let wire: WireChunk = serde_json::from_slice(line)
        .map_err(|e| TransportError::protocol(format!("undecodable stream line: {e}")))?;

    if let Some(error) = wire.error {
        return Err(TransportError::protocol(error));
    }

    Ok(ChatChunk {
        content: wire.message.map(|message| message.content).unwrap_or_default(),
        done: wire.done,
    })
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

struct LineReader {
    bytes: ByteStream,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl LineReader {
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        Some(line)
    }
}

/// Splits a byte stream into newline-delimited JSON chunks.
pub(crate) fn ndjson_chunks(
    bytes: ByteStream,
) -> impl Stream<Item = Result<ChatChunk, TransportError>> + Send {
    let reader = LineReader {
        bytes,
        buffer: Vec::new(),
        exhausted: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.next_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((decode_line(&line), reader));
            }

            if reader.exhausted {
                let rest = std::mem::take(&mut reader.buffer);
                if rest.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                return Some((decode_line(&rest), reader));
            }

            match reader.bytes.next().await {
                Some(Ok(bytes)) => reader.buffer.extend_from_slice(&bytes),
                Some(Err(error)) => {
                    reader.exhausted = true;
                    reader.buffer.clear();
                    return Some((Err(error), reader));
                }
                None => reader.exhausted = true,
            }
        }
    })
}
