//! Canned-reply generator for offline runs and tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{GenerationRequest, LlmError, TextGenerator, TextStream};

/// One scripted answer, consumed by the next `generate` or `stream` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// A complete reply. Streams it as a single fragment.
    Reply(String),
    /// A reply delivered as these fragments.
    Chunks(Vec<String>),
    /// These fragments, then a mid-stream failure.
    ChunksThenError(Vec<String>, LlmError),
    /// Fails before any text is produced.
    Fail(LlmError),
}

#[derive(Debug, Default)]
struct Inner {
    scripts: VecDeque<Script>,
    requests: Vec<GenerationRequest>,
}

/// [`TextGenerator`] that replays queued [`Script`]s in order.
///
/// Every request is recorded so callers can assert on the prompts that were
/// sent. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    inner: Arc<Mutex<Inner>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedGenerator {
    /// Creates a generator with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits this long before each streamed fragment.
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Queues a script.
    #[must_use]
    pub fn then(self, script: Script) -> Self {
        self.push(script);
        self
    }

    /// Queues a complete reply.
    #[must_use]
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.then(Script::Reply(text.into()))
    }

    /// Queues a streamed reply.
    #[must_use]
    pub fn then_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Script::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_fail(self, error: LlmError) -> Self {
        self.then(Script::Fail(error))
    }

    /// Queues a script on a shared generator.
    pub fn push(&self, script: Script) {
        self.lock().scripts.push_back(script);
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.lock().requests.clone()
    }

    /// Number of scripts not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.lock().scripts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_script(&self, request: &GenerationRequest) -> Script {
        let mut inner = self.lock();
        inner.requests.push(request.clone());
        inner
            .scripts
            .pop_front()
            .unwrap_or_else(|| Script::Fail(LlmError::EmptyResponse))
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        match self.next_script(request) {
            Script::Reply(text) => Ok(text),
            Script::Chunks(chunks) => Ok(chunks.concat()),
            Script::ChunksThenError(_, error) | Script::Fail(error) => Err(error),
        }
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, LlmError> {
        let items: Vec<Result<String, LlmError>> = match self.next_script(request) {
            Script::Reply(text) => vec![Ok(text)],
            Script::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            Script::ChunksThenError(chunks, error) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(error)))
                .collect(),
            Script::Fail(error) => return Err(error),
        };

        let stream = futures::stream::iter(items);
        match self.chunk_delay {
            Some(delay) => Ok(Box::pin(stream.then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            }))),
            None => Ok(Box::pin(stream)),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
