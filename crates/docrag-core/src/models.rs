//! Core data models shared by the ingestion and retrieval pipeline.
//!
//! These types describe documents, the vectors they own, per-document
//! confidence data, and the in-memory chunk cache.

use serde::{Deserialize, Serialize};

/// Chunk index reserved for level-1 (group summary) vectors.
pub const GROUP_SUMMARY_INDEX: i64 = -1;
/// Chunk index reserved for the level-2 (whole document) summary vector.
pub const DOCUMENT_SUMMARY_INDEX: i64 = -2;

/// A persisted document, keyed by its filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
}

/// Metadata stored alongside a [`Document`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub confidence_data: Option<ConfidenceRecord>,
    pub chunk_count: usize,
    /// Last committed lifecycle state, used to rebuild the registry on
    /// startup.
    #[serde(default)]
    pub index_state: Option<IndexState>,
}

/// Per-word confidence produced by an extractor (OCR engines mostly).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordConfidence {
    pub word: String,
    pub confidence: f32,
}

/// Extraction confidence for one document.
///
/// Produced once per ingestion and replaced on re-ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRecord {
    pub confidence: f32,
    pub text_length: usize,
    pub file_type: String,
    #[serde(default)]
    pub words: Vec<WordConfidence>,
}

impl ConfidenceRecord {
    /// Record for text that was read directly, with no recognition step.
    pub fn exact(text: &str, file_type: &str) -> Self {
        Self {
            confidence: 1.0,
            text_length: text.chars().count(),
            file_type: file_type.to_string(),
            words: Vec::new(),
        }
    }
}

/// Level of a vector in the hierarchical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkLevel {
    /// Raw chunk text.
    Chunk,
    /// Summary of a group of consecutive chunks.
    GroupSummary,
    /// Whole-document synthesis.
    DocumentSummary,
}

impl ChunkLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            ChunkLevel::Chunk => 0,
            ChunkLevel::GroupSummary => 1,
            ChunkLevel::DocumentSummary => 2,
        }
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(ChunkLevel::Chunk),
            1 => Some(ChunkLevel::GroupSummary),
            2 => Some(ChunkLevel::DocumentSummary),
            _ => None,
        }
    }

    /// The `type` tag written into vector metadata.
    pub fn type_tag(self) -> &'static str {
        match self {
            ChunkLevel::Chunk => "chunk",
            ChunkLevel::GroupSummary => "group_summary",
            ChunkLevel::DocumentSummary => "document_summary",
        }
    }
}

/// Metadata attached to every persisted vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub level: ChunkLevel,
    #[serde(rename = "type")]
    pub kind: String,
    /// Filename of the owning document.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_index: Option<usize>,
    /// Inclusive range of level-0 chunk indices a group summary covers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_range: Option<(usize, usize)>,
}

impl VectorMetadata {
    pub fn chunk(source: &str) -> Self {
        Self {
            level: ChunkLevel::Chunk,
            kind: ChunkLevel::Chunk.type_tag().to_string(),
            source: source.to_string(),
            summary_index: None,
            chunk_range: None,
        }
    }

    pub fn group_summary(source: &str, summary_index: usize, range: (usize, usize)) -> Self {
        Self {
            level: ChunkLevel::GroupSummary,
            kind: ChunkLevel::GroupSummary.type_tag().to_string(),
            source: source.to_string(),
            summary_index: Some(summary_index),
            chunk_range: Some(range),
        }
    }

    pub fn document_summary(source: &str) -> Self {
        Self {
            level: ChunkLevel::DocumentSummary,
            kind: ChunkLevel::DocumentSummary.type_tag().to_string(),
            source: source.to_string(),
            summary_index: None,
            chunk_range: None,
        }
    }
}

/// A vector row owned by exactly one document.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub document_id: String,
    /// `>= 0` for raw chunks, [`GROUP_SUMMARY_INDEX`] or
    /// [`DOCUMENT_SUMMARY_INDEX`] for summaries.
    pub chunk_index: i64,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: VectorMetadata,
}

/// One entry of the in-memory chunk cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Leading characters repeated from the previous chunk.
    pub overlap_chars: usize,
}

/// A binary asset kept next to a document (page images, photos).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Output of an extractor, ready for ingestion.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub confidence: ConfidenceRecord,
    pub assets: Vec<AssetRef>,
}

/// Lifecycle of a document inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Unindexed,
    Extracted,
    Chunked,
    PartiallyIndexed,
    FullyIndexed,
    HierarchicallyIndexed,
    Removed,
}

impl IndexState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Re-ingestion restarts the cycle, so every indexed state may go back
    /// to `Extracted`.
    pub fn can_transition_to(self, next: IndexState) -> bool {
        use IndexState::*;
        match (self, next) {
            (Removed, _) => false,
            (_, Removed) => true,
            (Unindexed, Extracted) => true,
            (Extracted, Chunked) => true,
            (Chunked, PartiallyIndexed) | (Chunked, FullyIndexed) => true,
            (FullyIndexed | HierarchicallyIndexed, HierarchicallyIndexed) => true,
            (Chunked | PartiallyIndexed | FullyIndexed | HierarchicallyIndexed, Extracted) => true,
            _ => false,
        }
    }

    /// Documents in these states have at least a partial vector set.
    pub fn is_searchable(self) -> bool {
        matches!(
            self,
            IndexState::PartiallyIndexed
                | IndexState::FullyIndexed
                | IndexState::HierarchicallyIndexed
        )
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexState::Unindexed => "unindexed",
            IndexState::Extracted => "extracted",
            IndexState::Chunked => "chunked",
            IndexState::PartiallyIndexed => "partially_indexed",
            IndexState::FullyIndexed => "fully_indexed",
            IndexState::HierarchicallyIndexed => "hierarchically_indexed",
            IndexState::Removed => "removed",
        };
        f.write_str(s)
    }
}
