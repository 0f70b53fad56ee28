//! Explicit per-request context.
//!
//! Everything a call chain needs beyond its arguments travels in a
//! [`RequestContext`]: whether generation should stream, and where to
//! report progress. Nothing is kept in thread-locals or globals.

use std::fmt;
use std::sync::Arc;

/// Progress notifications emitted during ingestion and summarization.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Chunked { name: String, chunks: usize },
    Embedded { name: String, done: usize, total: usize },
    Persisted { name: String, vectors: usize },
    SummaryGenerated { name: String, fallback: bool },
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Context threaded through ingestion, summarization and retrieval.
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Forwarded to [`Generator::generate`](crate::generation::Generator::generate).
    pub stream_generation: bool,
    progress: Option<ProgressSink>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream_generation = stream;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn report(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink(event);
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("stream_generation", &self.stream_generation)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
