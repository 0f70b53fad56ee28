//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] capability that all embedding backends
//! implement, plus pure helpers for similarity and for the textual vector
//! format (`"[v1, v2, ...]"`) used by text-typed vector columns.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `docrag`
//! app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Maps text to a fixed-dimension vector.
///
/// Implementations are loaded once at startup and shared read-only
/// between the ingestion and query paths, hence `Send + Sync`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, one vector per input in the same order.
    ///
    /// The default calls [`embed`](Embedder::embed) sequentially; backends
    /// with a native batch endpoint should override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors. Equal to `1 - cosine_distance`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Serialize a vector as `"[v1, v2, ...]"`.
///
/// # Example
///
/// ```rust
/// use docrag_core::embedding::{format_vector, parse_vector};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let text = format_vector(&v);
/// assert_eq!(text, "[1, -2.5, 3.125]");
/// assert_eq!(parse_vector(&text).unwrap(), v);
/// ```
pub fn format_vector(vec: &[f32]) -> String {
    let body = vec
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", body)
}

/// Parse the output of [`format_vector`].
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("vector text must be enclosed in brackets");
    };
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|e| anyhow::anyhow!("invalid vector component '{}': {}", v.trim(), e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_text_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, 1e-7];
        let restored = parse_vector(&format_vector(&vec)).unwrap();
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_parse_vector_tolerates_spacing() {
        assert_eq!(parse_vector(" [1,2 ,  3] ").unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(parse_vector("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_vector_rejects_garbage() {
        assert!(parse_vector("1, 2").is_err());
        assert!(parse_vector("[1, x]").is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
