//! Error taxonomy.
//!
//! [`TransportError`] describes a failed chat round-trip and is always fatal
//! for the exchange. [`InstructorError`] is what callers of the retry
//! controller see. Extraction, parse and schema failures are not errors at this
//! level: they are [`FieldError`](crate::FieldError) kinds that the loop
//! consumes while it still has budget.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::schema::SchemaError;
use crate::validation::ValidationErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The server could not be reached.
    Connect,
    /// The server answered with a non-success status.
    Status,
    /// The response body could not be decoded.
    Protocol,
    Timeout,
    /// The exchange was abandoned before completion.
    Cancelled,
    /// Scripted transport ran out of responses.
    Exhausted,
}

/// Failure of a single chat round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    status: Option<u16>,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
            status: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            message: format!("HTTP {status}: {}", message.into()),
            status: Some(status),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Protocol,
            message: message.into(),
            status: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
            status: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Cancelled,
            message: message.into(),
            status: None,
        }
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Exhausted,
            message: message.into(),
            status: None,
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status for [`TransportErrorKind::Status`] errors.
    pub const fn http_status(&self) -> Option<u16> {
        self.status
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            TransportErrorKind::Connect => "transport.connect",
            TransportErrorKind::Status => "transport.status",
            TransportErrorKind::Protocol => "transport.protocol",
            TransportErrorKind::Timeout => "transport.timeout",
            TransportErrorKind::Cancelled => "transport.cancelled",
            TransportErrorKind::Exhausted => "transport.exhausted",
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for TransportError {}

/// Error returned by the retry controller.
#[derive(Debug, thiserror::Error)]
pub enum InstructorError {
    /// The chat transport failed; never retried.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Every attempt failed validation and repair was not allowed.
    #[error("retries exhausted after {attempts} attempt(s); last validation error: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: ValidationErrors,
    },

    /// The request could not be sent as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A stream ended without a final chunk or an error.
    #[error("stream ended after {chunks} chunk(s) without a final result")]
    IncompleteStream { chunks: usize },

    /// Content could not be deserialized into the requested type.
    #[error("failed to decode content: {0}")]
    Decode(#[from] serde_json::Error),
}

impl InstructorError {
    /// Stable machine-readable identifier, used by the CLI and stream events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(error) => error.code(),
            Self::RetriesExhausted { .. } => "instructor.retries_exhausted",
            Self::InvalidRequest(_) => "instructor.invalid_request",
            Self::Schema(_) => "instructor.schema",
            Self::IncompleteStream { .. } => "instructor.incomplete_stream",
            Self::Decode(_) => "instructor.decode",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
