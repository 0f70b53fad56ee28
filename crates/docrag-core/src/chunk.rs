//! Recursive text chunker with overlapping windows.
//!
//! Splits document text into chunks of at most `chunk_size` characters.
//! Consecutive chunks share up to `overlap` characters so that sentences
//! straddling a boundary stay retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Cut the text into atomic pieces, trying separators from coarse to
//!    fine: paragraph (`\n\n`), line (`\n`), sentence end, word (` `).
//!    A piece that is still longer than `chunk_size` is split by the next
//!    separator; once separators are exhausted it falls apart into single
//!    characters. Separators stay attached to the piece they end, so the
//!    pieces concatenate back to the original text.
//! 2. Greedily pack pieces into a chunk until the next piece would exceed
//!    `chunk_size`.
//! 3. Seed the next chunk with the longest run of trailing pieces of the
//!    emitted chunk that fits in `overlap` characters.
//!
//! All lengths are counted in `char`s, never bytes.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::{Chunker, ChunkingParams};
//!
//! let chunker = Chunker::new(ChunkingParams { chunk_size: 1500, overlap: 200 });
//! let chunks = chunker.split("notes.txt", "Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use crate::models::CachedChunk;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_OVERLAP: usize = 200;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// A chunk together with the number of leading characters it shares with
/// the previous chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub text: String,
    pub overlap_chars: usize,
}

/// Deterministic splitter. Cheap to copy.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker; `chunk_size` is clamped to at least 1 and `overlap`
    /// to strictly less than `chunk_size`.
    pub fn new(params: ChunkingParams) -> Self {
        let chunk_size = params.chunk_size.max(1);
        Self {
            chunk_size,
            overlap: params.overlap.min(chunk_size - 1),
        }
    }

    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }

    /// Split a document's text. Empty (or whitespace-only) text yields one
    /// placeholder chunk naming the document.
    pub fn split(&self, document_name: &str, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![placeholder_chunk(document_name)];
        }
        self.spans(text).into_iter().map(|s| s.text).collect()
    }

    /// Split into [`CachedChunk`]s with contiguous indices from 0.
    pub fn chunk_document(&self, document_name: &str, text: &str) -> Vec<CachedChunk> {
        if text.trim().is_empty() {
            return vec![CachedChunk {
                content: placeholder_chunk(document_name),
                chunk_index: 0,
                overlap_chars: 0,
            }];
        }
        self.spans(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| CachedChunk {
                content: span.text,
                chunk_index,
                overlap_chars: span.overlap_chars,
            })
            .collect()
    }

    /// Split raw text into spans carrying their overlap length.
    ///
    /// Returns an empty vector for empty input.
    pub fn spans(&self, text: &str) -> Vec<ChunkSpan> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut pieces = Vec::new();
        split_pieces(text, SEPARATORS, self.chunk_size, &mut pieces);
        self.merge(&pieces)
    }

    fn merge(&self, pieces: &[&str]) -> Vec<ChunkSpan> {
        let mut spans = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut current_len = 0usize;
        let mut current_overlap = 0usize;

        for &piece in pieces {
            let len = piece.chars().count();
            if current_len + len > self.chunk_size && current_len > current_overlap {
                spans.push(ChunkSpan {
                    text: current.iter().map(|(p, _)| *p).collect(),
                    overlap_chars: current_overlap,
                });

                let mut keep = 0usize;
                let mut tail_len = 0usize;
                for (_, plen) in current.iter().rev() {
                    if tail_len + plen > self.overlap || tail_len + plen + len > self.chunk_size {
                        break;
                    }
                    tail_len += plen;
                    keep += 1;
                }
                let dropped = current.len() - keep;
                current.drain(..dropped);
                current_len = tail_len;
                current_overlap = tail_len;
            }
            current.push((piece, len));
            current_len += len;
        }

        if current_len > current_overlap || spans.is_empty() {
            spans.push(ChunkSpan {
                text: current.iter().map(|(p, _)| *p).collect(),
                overlap_chars: current_overlap,
            });
        }
        spans
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingParams::default())
    }
}

/// Convenience wrapper around [`Chunker::split`].
pub fn split_text(document_name: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    Chunker::new(ChunkingParams {
        chunk_size,
        overlap,
    })
    .split(document_name, text)
}

/// Text of the chunk synthesized for documents without extractable text.
pub fn placeholder_chunk(document_name: &str) -> String {
    format!("[Document '{}' contains no extractable text]", document_name)
}

/// Rebuild the original text from spans by dropping each overlap prefix.
pub fn reassemble(spans: &[ChunkSpan]) -> String {
    let mut out = String::new();
    for span in spans {
        out.extend(span.text.chars().skip(span.overlap_chars));
    }
    out
}

fn split_pieces<'a>(text: &'a str, separators: &[&str], max: usize, out: &mut Vec<&'a str>) {
    if text.chars().count() <= max {
        out.push(text);
        return;
    }
    let Some((sep, rest)) = separators.split_first() else {
        let mut start = 0;
        for (i, _) in text.char_indices().skip(1) {
            out.push(&text[start..i]);
            start = i;
        }
        out.push(&text[start..]);
        return;
    };
    if !text.contains(*sep) {
        split_pieces(text, rest, max, out);
        return;
    }
    for part in text.split_inclusive(*sep) {
        if part.chars().count() > max {
            split_pieces(part, rest, max, out);
        } else {
            out.push(part);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingParams {
            chunk_size: size,
            overlap,
        })
    }

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{}", i % 97))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Short text.\n\nWith two paragraphs.";
        let chunks = chunker(1500, 200).split("a.txt", text);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_text_exactly_chunk_size() {
        let text = "x".repeat(1500);
        let chunks = chunker(1500, 200).split("a.txt", &text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_empty_text_placeholder() {
        let chunks = chunker(1500, 200).split("blank.txt", "");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("blank.txt"));

        let chunks = chunker(1500, 200).split("blank.txt", "  \n\n ");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("blank.txt"));
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = words(3000);
        for chunk in chunker(500, 80).split("a.txt", &text) {
            assert!(chunk.chars().count() <= 500);
        }
    }

    #[test]
    fn test_overlap_is_shared_suffix_prefix() {
        let text = words(2000);
        let spans = chunker(400, 60).spans(&text);
        assert!(spans.len() > 2);
        for pair in spans.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(next.overlap_chars <= 60);
            let prefix: String = next.text.chars().take(next.overlap_chars).collect();
            assert!(prev.text.ends_with(&prefix));
        }
    }

    #[test]
    fn test_reassemble_reconstructs_input() {
        let text = format!(
            "{}\n\n{}\nline two. Sentence! Question? {}",
            words(300),
            words(150),
            "z".repeat(900)
        );
        let spans = chunker(350, 50).spans(&text);
        assert_eq!(reassemble(&spans), text);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "a".repeat(50_000);
        let chunks = chunker(1500, 200).split("flat.txt", &text);
        let expected = ((50_000f64 - 200.0) / 1300.0).ceil() as i64;
        assert!((chunks.len() as i64 - expected).abs() <= 1, "got {}", chunks.len());
        assert!(chunks.iter().all(|c| c.chars().count() <= 1500));
    }

    #[test]
    fn test_word_text_without_paragraphs() {
        let mut text = String::new();
        while text.len() < 50_000 {
            text.push_str("lorem ipsum dolor sit amet ");
        }
        text.truncate(50_000);
        let chunks = chunker(1500, 200).split("words.txt", &text);
        let expected = ((50_000f64 - 200.0) / 1300.0).ceil() as i64;
        assert!((chunks.len() as i64 - expected).abs() <= 1, "got {}", chunks.len());
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Привет, мир! ".repeat(400);
        let spans = chunker(300, 40).spans(&text);
        for span in &spans {
            assert!(span.text.chars().count() <= 300);
        }
        assert_eq!(reassemble(&spans), text);
    }

    #[test]
    fn test_deterministic() {
        let text = words(1200);
        assert_eq!(chunker(300, 50).split("a", &text), chunker(300, 50).split("a", &text));
    }

    #[test]
    fn test_chunk_document_indices() {
        let docs = chunker(200, 20).chunk_document("a.txt", &words(400));
        for (i, c) in docs.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_overlap_clamped() {
        let c = chunker(10, 50);
        assert_eq!(c.params().overlap, 9);
        let spans = c.spans(&"b".repeat(100));
        assert_eq!(reassemble(&spans), "b".repeat(100));
    }
}
