//! Synchronous facade over [`Instructor`].
//!
//! Owns a current-thread Tokio runtime. Do not call from inside an async
//! context; use [`Instructor`] there.

use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Runtime};

use crate::config::RunOptions;
use crate::controller::Instructor;
use crate::envelope::{ResponseEnvelope, TypedResponse};
use crate::error::InstructorError;
use crate::message::ChatMessage;
use crate::schema::SchemaModel;
use crate::stream::StreamChunk;

#[derive(Debug)]
pub struct BlockingInstructor {
    inner: Instructor,
    runtime: Runtime,
}

impl BlockingInstructor {
    pub fn new(inner: Instructor) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    pub fn inner(&self) -> &Instructor {
        &self.inner
    }

    pub fn run_once(
        &self,
        schema: &dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
    ) -> Result<ResponseEnvelope, InstructorError> {
        self.runtime
            .block_on(self.inner.run_once(schema, messages, options))
    }

    pub fn run_once_typed<T>(
        &self,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
    ) -> Result<TypedResponse<T>, InstructorError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        self.runtime
            .block_on(self.inner.run_once_typed(messages, options))
    }

    /// Drives a stream to completion, handing every chunk to `on_chunk`, and
    /// returns the final chunk.
    pub fn run_stream_with<F>(
        &self,
        schema: &dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
        mut on_chunk: F,
    ) -> Result<StreamChunk, InstructorError>
    where
        F: FnMut(&StreamChunk),
    {
        self.runtime
            .block_on(drain(self.inner.run_stream(schema, messages, options), &mut on_chunk))
    }

    /// Collects every chunk of a stream.
    pub fn run_stream_collect(
        &self,
        schema: &dyn SchemaModel,
        messages: Vec<ChatMessage>,
        options: &RunOptions,
    ) -> Result<Vec<StreamChunk>, InstructorError> {
        let mut chunks = Vec::new();
        self.run_stream_with(schema, messages, options, |chunk| chunks.push(chunk.clone()))?;
        Ok(chunks)
    }
}

/// Feeds every chunk to `on_chunk` and stops at the final one.
async fn drain<S, F>(stream: S, on_chunk: &mut F) -> Result<StreamChunk, InstructorError>
where
    S: Stream<Item = Result<StreamChunk, InstructorError>>,
    F: FnMut(&StreamChunk),
{
    futures::pin_mut!(stream);

    let mut seen = 0;
    while let Some(item) = stream.next().await {
        let chunk = item?;
        seen += 1;
        on_chunk(&chunk);
        if chunk.done {
            return Ok(chunk);
        }
    }
    Err(InstructorError::IncompleteStream { chunks: seen })
}
