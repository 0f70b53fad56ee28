//! In-memory store for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Similarity search is brute-force cosine similarity over all stored
//! vectors. Locks are never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{Document, VectorRecord};

use super::{sort_by_similarity, DocumentStore, ScoredVector, SearchFilter, VectorStore};

/// In-memory [`VectorStore`] + [`DocumentStore`].
pub struct InMemoryStore {
    /// Keyed by filename.
    docs: RwLock<HashMap<String, Document>>,
    vectors: RwLock<Vec<VectorRecord>>,
    reject_batches: AtomicBool,
    reject_deletes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            vectors: RwLock::new(Vec::new()),
            reject_batches: AtomicBool::new(false),
            reject_deletes: AtomicBool::new(false),
        }
    }

    /// Make [`create_vectors_batch`](VectorStore::create_vectors_batch)
    /// fail, to exercise the sequential fallback.
    pub fn set_reject_batches(&self, reject: bool) {
        self.reject_batches.store(reject, Ordering::SeqCst);
    }

    /// Make both delete operations fail, to exercise error paths of
    /// removal and re-ingestion.
    pub fn set_reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::SeqCst);
    }

    /// Total number of stored vectors across all documents.
    pub fn vector_count(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    /// Snapshot of every stored record.
    pub fn all_vectors(&self) -> Vec<VectorRecord> {
        self.vectors
            .read()
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_vector(&self, record: &VectorRecord) -> Result<String> {
        self.vectors.write().map_err(poisoned)?.push(record.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn create_vectors_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        if self.reject_batches.load(Ordering::SeqCst) {
            bail!("batch insert rejected");
        }
        self.vectors
            .write()
            .map_err(poisoned)?
            .extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredVector>> {
        let vectors = self.vectors.read().map_err(poisoned)?;
        let mut results: Vec<ScoredVector> = vectors
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| ScoredVector {
                similarity: cosine_similarity(embedding, &r.embedding),
                record: r.clone(),
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_vectors_by_document(&self, document_id: &str) -> Result<bool> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            bail!("vector delete rejected");
        }
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        let before = vectors.len();
        vectors.retain(|r| r.document_id != document_id);
        Ok(vectors.len() != before)
    }

    async fn count_vectors(&self, document_id: &str) -> Result<usize> {
        let vectors = self.vectors.read().map_err(poisoned)?;
        Ok(vectors
            .iter()
            .filter(|r| r.document_id == document_id)
            .count())
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, doc: &Document) -> Result<Document> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        let stored = match docs.get(&doc.filename) {
            Some(existing) => Document {
                id: existing.id.clone(),
                created_at: existing.created_at,
                ..doc.clone()
            },
            None => doc.clone(),
        };
        docs.insert(stored.filename.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_document(&self, filename: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().map_err(poisoned)?.get(filename).cloned())
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.docs.read().map_err(poisoned)?.values().cloned().collect();
        docs.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            bail!("document delete rejected");
        }
        let removed = {
            let mut docs = self.docs.write().map_err(poisoned)?;
            let before = docs.len();
            docs.retain(|_, d| d.id != id);
            docs.len() != before
        };
        if removed {
            self.vectors
                .write()
                .map_err(poisoned)?
                .retain(|r| r.document_id != id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkLevel, DocumentMetadata, VectorMetadata};

    fn record(doc: &str, index: i64, embedding: Vec<f32>, meta: VectorMetadata) -> VectorRecord {
        VectorRecord {
            document_id: doc.to_string(),
            chunk_index: index,
            embedding,
            content: format!("{}-{}", doc, index),
            metadata: meta,
        }
    }

    fn doc(id: &str, filename: &str, created_at: i64) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            content: "body".to_string(),
            metadata: DocumentMetadata::default(),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_search_limit_and_order() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            let angle = i as f32 * 0.15;
            store
                .create_vector(&record("d1", i, vec![angle.cos(), angle.sin()], VectorMetadata::chunk("a.txt")))
                .await
                .unwrap();
        }
        let results = store
            .similarity_search(&[1.0, 0.0], 3, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(results[0].record.chunk_index, 0);
    }

    #[tokio::test]
    async fn test_level_and_document_filter() {
        let store = InMemoryStore::new();
        let batch = vec![
            record("d1", 0, vec![1.0, 0.0], VectorMetadata::chunk("a.txt")),
            record("d1", -1, vec![1.0, 0.1], VectorMetadata::group_summary("a.txt", 0, (0, 7))),
            record("d1", -2, vec![1.0, 0.2], VectorMetadata::document_summary("a.txt")),
            record("d2", 0, vec![1.0, 0.0], VectorMetadata::chunk("b.txt")),
        ];
        assert_eq!(store.create_vectors_batch(&batch).await.unwrap(), 4);

        let summaries = store
            .similarity_search(
                &[1.0, 0.0],
                10,
                &SearchFilter::levels(&[ChunkLevel::GroupSummary, ChunkLevel::DocumentSummary]),
            )
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.record.chunk_index < 0));

        let only_d2 = SearchFilter {
            document_id: Some("d2".to_string()),
            levels: None,
        };
        let hits = store.similarity_search(&[1.0, 0.0], 10, &only_d2).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.metadata.source, "b.txt");
    }

    #[tokio::test]
    async fn test_delete_cascade() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "a.txt", 1)).await.unwrap();
        store
            .create_vector(&record("d1", 0, vec![1.0], VectorMetadata::chunk("a.txt")))
            .await
            .unwrap();
        assert_eq!(store.count_vectors("d1").await.unwrap(), 1);
        assert!(store.delete_document("d1").await.unwrap());
        assert_eq!(store.count_vectors("d1").await.unwrap(), 0);
        assert!(!store.delete_document("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_keeps_id_and_created_at() {
        let store = InMemoryStore::new();
        store.create_document(&doc("first", "a.txt", 10)).await.unwrap();
        let mut again = doc("second", "a.txt", 20);
        again.content = "new body".to_string();
        let stored = store.create_document(&again).await.unwrap();
        assert_eq!(stored.id, "first");
        assert_eq!(stored.created_at, 10);
        assert_eq!(stored.updated_at, 20);
        assert_eq!(store.get_all_documents().await.unwrap().len(), 1);
        assert_eq!(store.get_document("a.txt").await.unwrap().unwrap().content, "new body");
    }

    #[tokio::test]
    async fn test_rejected_batch() {
        let store = InMemoryStore::new();
        store.set_reject_batches(true);
        let batch = vec![record("d1", 0, vec![1.0], VectorMetadata::chunk("a.txt"))];
        assert!(store.create_vectors_batch(&batch).await.is_err());
        assert_eq!(store.vector_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_deletes_leave_data() {
        let store = InMemoryStore::new();
        store.create_document(&doc("d1", "a.txt", 1)).await.unwrap();
        store
            .create_vector(&record("d1", 0, vec![1.0], VectorMetadata::chunk("a.txt")))
            .await
            .unwrap();
        store.set_reject_deletes(true);
        assert!(store.delete_vectors_by_document("d1").await.is_err());
        assert!(store.delete_document("d1").await.is_err());
        assert_eq!(store.count_vectors("d1").await.unwrap(), 1);
        assert!(store.get_document("a.txt").await.unwrap().is_some());
    }
}
