//! # NDJSON Stream Events
//!
//! Streamed runs are reported as newline-delimited JSON, one event per line.
//!
//! ## Event Types
//!
//! | Event | Description |
//! |-------|-------------|
//! | `start` | Run initiated; carries the request id and model |
//! | `chunk` | A validated snapshot of the reply so far |
//! | `retry` | An attempt failed validation and a new one begins |
//! | `end` | Run completed; carries the final content |
//! | `error` | Run failed |
//!
//! Every event has a `seq` starting at 1 and an RFC 3339 `ts`.

use std::io::Write;

use ferroshape_core::{InstructorError, StreamChunk};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use time::OffsetDateTime;

use crate::metadata::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventType {
    Start,
    Chunk,
    Retry,
    End,
    Error,
}

/// Error payload for `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEventError {
    /// Machine-readable code such as `transport.timeout`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl StreamEventError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

impl From<&InstructorError> for StreamEventError {
    /// Transport failures may succeed when the run is repeated; nothing else will.
    fn from(error: &InstructorError) -> Self {
        Self::new(error.code(), error.to_string()).with_retryable(error.is_transport())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: StreamEventType,
    pub seq: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Present on `error` events only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamEventError>,
}

/// Writes stream events as NDJSON, flushing after each line.
///
/// Not thread-safe; use one writer per run.
pub struct NdjsonStreamWriter<W: Write> {
    writer: W,
    next_seq: u64,
}

impl<W: Write> NdjsonStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, next_seq: 1 }
    }

    /// Emits `start`. Keys of an object `context` are merged into the payload.
    pub fn emit_start(
        &mut self,
        request_id: RequestId,
        model: &str,
        context: Option<Value>,
    ) -> Result<(), StreamError> {
        let mut data = Map::new();
        data.insert("request_id".to_string(), Value::String(request_id.to_string()));
        data.insert("model".to_string(), Value::String(model.to_string()));
        if let Some(Value::Object(extra)) = context {
            data.extend(extra);
        }
        self.emit(StreamEventType::Start, Some(Value::Object(data)), None)
    }

    pub fn emit_chunk(&mut self, chunk: &StreamChunk) -> Result<(), StreamError> {
        let data = serde_json::to_value(chunk)?;
        self.emit(StreamEventType::Chunk, Some(data), None)
    }

    /// Emits `retry` for the closing chunk of a rejected attempt.
    pub fn emit_retry(&mut self, chunk: &StreamChunk) -> Result<(), StreamError> {
        let data = json!({
            "attempt": chunk.attempt,
            "retries_remaining": chunk.retries_remaining,
            "validation_error": chunk.validation_error,
        });
        self.emit(StreamEventType::Retry, Some(data), None)
    }

    pub fn emit_end(&mut self, data: Option<Value>) -> Result<(), StreamError> {
        self.emit(StreamEventType::End, data, None)
    }

    pub fn emit_error(&mut self, error: StreamEventError, data: Option<Value>) -> Result<(), StreamError> {
        self.emit(StreamEventType::Error, data, Some(error))
    }

    /// Sequence number of the next event.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit(
        &mut self,
        event: StreamEventType,
        data: Option<Value>,
        error: Option<StreamEventError>,
    ) -> Result<(), StreamError> {
        let event = StreamEvent {
            event,
            seq: self.next_seq,
            ts: OffsetDateTime::now_utc(),
            data,
            error,
        };
        self.next_seq += 1;

        let payload = serde_json::to_string(&event)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses NDJSON lines into events, skipping blank lines.
pub fn parse_stream_events(input: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Checks that every line is a well-formed event with strictly increasing
/// `seq` and returns the number of events.
pub fn validate_stream(input: &str) -> Result<usize, StreamValidationError> {
    let mut count = 0;
    let mut last_seq = 0;

    for (index, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = index + 1;
        let event: StreamEvent = serde_json::from_str(line).map_err(|e| StreamValidationError {
            line_number,
            message: e.to_string(),
        })?;

        if event.seq <= last_seq {
            return Err(StreamValidationError {
                line_number,
                message: format!("sequence number {} does not follow {last_seq}", event.seq),
            });
        }
        if event.event == StreamEventType::Error && event.error.is_none() {
            return Err(StreamValidationError {
                line_number,
                message: "error events must have error payload".to_string(),
            });
        }

        last_seq = event.seq;
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream validation error at line {line_number}: {message}")]
pub struct StreamValidationError {
    /// 1-based.
    pub line_number: usize,
    pub message: String,
}
