//! # ferroshape-agent
//!
//! Machine-facing output for ferroshape runs.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`stream`] | NDJSON event writer, parser and validator |
//! | [`metadata`] | Request identifiers |
//!
//! ## Quick Start
//!
//! ```rust
//! use ferroshape_agent::{parse_stream_events, NdjsonStreamWriter, RequestId, StreamEventType};
//!
//! let mut sink = Vec::new();
//! let mut writer = NdjsonStreamWriter::new(&mut sink);
//! writer.emit_start(RequestId::new_v4(), "llama3", None).expect("start");
//! writer.emit_end(None).expect("end");
//!
//! let events = parse_stream_events(std::str::from_utf8(&sink).expect("utf8")).expect("parse");
//! assert_eq!(events[1].event, StreamEventType::End);
//! ```

pub mod metadata;
pub mod stream;

pub use metadata::{InvalidRequestId, RequestId};
pub use stream::{
    parse_stream_events, validate_stream, NdjsonStreamWriter, StreamError, StreamEvent, StreamEventError,
    StreamEventType, StreamValidationError,
};
