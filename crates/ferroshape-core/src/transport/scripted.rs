use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use futures::stream;

use super::{ChatChunk, ChatRequest, ChatResponse, ChatTransport, ChunkStream, TransportFuture};
use crate::error::TransportError;
use crate::message::ChatMessage;

/// One queued reply of a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Whole reply text. Streamed as a single chunk.
    Response(String),
    /// Reply split into chunks. Answered whole on non-streamed calls.
    Chunks(Vec<String>),
    /// Like `Chunks`, but the last chunk carries the done marker itself
    /// instead of being followed by an empty closing chunk.
    FinalChunks(Vec<String>),
    /// Chunks followed by a mid-stream failure.
    BrokenStream {
        chunks: Vec<String>,
        error: TransportError,
    },
    /// The call fails before any content is produced.
    Failure(TransportError),
}

/// Deterministic offline transport.
///
/// Replies are consumed in order, one per call, and every request is recorded
/// so tests can assert on exactly what was sent. A call with nothing queued
/// fails with [`TransportError::exhausted`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.push(reply);
        self
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_reply(ScriptedReply::Response(text.into()))
    }

    pub fn with_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_reply(ScriptedReply::Chunks(
            chunks.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_final_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_reply(ScriptedReply::FinalChunks(
            chunks.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_failure(self, error: TransportError) -> Self {
        self.with_reply(ScriptedReply::Failure(error))
    }

    /// Queues another reply on a shared transport.
    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_reply(&self, request: ChatRequest) -> Result<ScriptedReply, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| TransportError::exhausted("no scripted reply left"))
    }
}

impl ChatTransport for ScriptedTransport {
    fn chat<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChatResponse> {
        let model = request.model.clone();
        let reply = self.next_reply(request);

        Box::pin(async move {
            let text = match reply? {
                ScriptedReply::Response(text) => text,
                ScriptedReply::Chunks(chunks) | ScriptedReply::FinalChunks(chunks) => chunks.concat(),
                ScriptedReply::BrokenStream { error, .. } | ScriptedReply::Failure(error) => {
                    return Err(error)
                }
            };
            Ok(ChatResponse::new(model, ChatMessage::assistant(text)))
        })
    }

    fn chat_stream<'a>(&'a self, request: ChatRequest) -> TransportFuture<'a, ChunkStream<'a>> {
        let reply = self.next_reply(request);

        Box::pin(async move {
            let items: Vec<Result<ChatChunk, TransportError>> = match reply? {
                ScriptedReply::Response(text) => vec![Ok(ChatChunk::partial(text)), Ok(ChatChunk::last(""))],
                ScriptedReply::Chunks(chunks) => chunks
                    .into_iter()
                    .map(|chunk| Ok(ChatChunk::partial(chunk)))
                    .chain(std::iter::once(Ok(ChatChunk::last(""))))
                    .collect(),
                ScriptedReply::FinalChunks(mut chunks) => {
                    let last = chunks.pop().unwrap_or_default();
                    chunks
                        .into_iter()
                        .map(|chunk| Ok(ChatChunk::partial(chunk)))
                        .chain(std::iter::once(Ok(ChatChunk::last(last))))
                        .collect()
                }
                ScriptedReply::BrokenStream { chunks, error } => chunks
                    .into_iter()
                    .map(|chunk| Ok(ChatChunk::partial(chunk)))
                    .chain(std::iter::once(Err(error)))
                    .collect(),
                ScriptedReply::Failure(error) => return Err(error),
            };

            let chunks: ChunkStream<'a> = Box::pin(stream::iter(items));
            Ok(chunks)
        })
    }
}
