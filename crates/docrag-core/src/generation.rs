//! Text generation capability used by whole-document summarization.

use anyhow::Result;
use async_trait::async_trait;

/// Produces text from a prompt.
///
/// Optional: when absent, summarization falls back to a deterministic
/// extract.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`.
    ///
    /// `streaming` asks the backend to stream tokens; the returned string is
    /// always the full completion.
    async fn generate(&self, prompt: &str, streaming: bool) -> Result<String>;
}
