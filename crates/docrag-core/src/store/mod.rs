//! Storage abstraction for docrag.
//!
//! Two capabilities back the engine:
//!
//! - [`VectorStore`] persists [`VectorRecord`]s and answers nearest-neighbor
//!   queries ranked by cosine similarity.
//! - [`DocumentStore`] is CRUD over [`Document`]s keyed by filename.
//!
//! Backends (SQLite in the app crate, [`memory::InMemoryStore`] here)
//! usually implement both. Either may be absent at runtime; the engine then
//! degrades instead of failing.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkLevel, Document, VectorRecord};

/// Restricts a similarity search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Only vectors owned by this document.
    pub document_id: Option<String>,
    /// Only vectors at these levels; `None` means every level.
    pub levels: Option<Vec<ChunkLevel>>,
}

impl SearchFilter {
    pub fn levels(levels: &[ChunkLevel]) -> Self {
        Self {
            document_id: None,
            levels: Some(levels.to_vec()),
        }
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(doc_id) = &self.document_id {
            if &record.document_id != doc_id {
                return false;
            }
        }
        match &self.levels {
            Some(levels) => levels.contains(&record.metadata.level),
            None => true,
        }
    }
}

/// A vector returned from similarity search.
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub record: VectorRecord,
    /// Cosine similarity, `1 - cosine_distance`.
    pub similarity: f32,
}

/// Vector persistence and nearest-neighbor search.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_vector`](VectorStore::create_vector) | Persist one record |
/// | [`create_vectors_batch`](VectorStore::create_vectors_batch) | Persist many records in one round trip |
/// | [`similarity_search`](VectorStore::similarity_search) | Top-`limit` records by similarity |
/// | [`delete_vectors_by_document`](VectorStore::delete_vectors_by_document) | Cascade delete |
/// | [`count_vectors`](VectorStore::count_vectors) | Records owned by a document |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist one record, returning its store id.
    async fn create_vector(&self, record: &VectorRecord) -> Result<String>;

    /// Persist many records, returning how many were created.
    ///
    /// Best-effort; callers fall back to [`create_vector`](VectorStore::create_vector)
    /// when this fails.
    async fn create_vectors_batch(&self, records: &[VectorRecord]) -> Result<usize>;

    /// Top-`limit` records by descending cosine similarity.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredVector>>;

    /// Delete every record owned by `document_id`. Returns whether any
    /// record was removed.
    async fn delete_vectors_by_document(&self, document_id: &str) -> Result<bool>;

    /// Number of records owned by `document_id`.
    async fn count_vectors(&self, document_id: &str) -> Result<usize>;
}

/// Document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, or replace content and metadata of the existing
    /// document with the same filename. Returns the stored document; its id
    /// and `created_at` are kept on update.
    async fn create_document(&self, doc: &Document) -> Result<Document>;

    async fn get_document(&self, filename: &str) -> Result<Option<Document>>;

    async fn get_all_documents(&self) -> Result<Vec<Document>>;

    /// Delete by id. Returns whether a document was removed.
    async fn delete_document(&self, id: &str) -> Result<bool>;
}

/// Sort by descending similarity, NaN-safe.
pub fn sort_by_similarity(results: &mut [ScoredVector]) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
