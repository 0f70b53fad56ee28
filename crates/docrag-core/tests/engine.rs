//! End-to-end engine behavior over the in-memory store with a
//! deterministic bag-of-words embedder.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use docrag_core::chunk::ChunkingParams;
use docrag_core::context::RequestContext;
use docrag_core::embedding::Embedder;
use docrag_core::engine::{Capabilities, DocumentEngine, EngineSettings};
use docrag_core::error::EngineError;
use docrag_core::generation::Generator;
use docrag_core::models::{
    ChunkLevel, IndexState, DOCUMENT_SUMMARY_INDEX, GROUP_SUMMARY_INDEX,
};
use docrag_core::retrieve::{ContextRequest, SearchStrategy, TRUNCATION_MARKER};
use docrag_core::store::memory::InMemoryStore;

const DIMS: usize = 64;

fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

struct HashEmbedder {
    fail_queries: bool,
    poison: Option<&'static str>,
}

impl HashEmbedder {
    fn new() -> Self {
        Self {
            fail_queries: false,
            poison: None,
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-64"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail_queries {
            bail!("embedding service unreachable");
        }
        if let Some(poison) = self.poison {
            if text.contains(poison) {
                bail!("cannot embed poisoned text");
            }
        }
        Ok(hash_embed(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(poison) = self.poison {
            if texts.iter().any(|t| t.contains(poison)) {
                bail!("cannot embed poisoned batch");
            }
        }
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

struct FixedGenerator(&'static str);

#[async_trait]
impl Generator for FixedGenerator {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, prompt: &str, _streaming: bool) -> Result<String> {
        assert!(prompt.contains("--- Beginning ---"));
        Ok(self.0.to_string())
    }
}

struct Harness {
    engine: DocumentEngine,
    store: Arc<InMemoryStore>,
}

fn harness_with(embedder: HashEmbedder, settings: EngineSettings) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let caps = Capabilities {
        embedder: Some(Arc::new(embedder)),
        generator: None,
        vector_store: Some(store.clone()),
        document_store: Some(store.clone()),
    };
    Harness {
        engine: DocumentEngine::new(caps, settings),
        store,
    }
}

fn harness() -> Harness {
    harness_with(HashEmbedder::new(), EngineSettings::default())
}

fn small_chunks() -> EngineSettings {
    EngineSettings {
        chunking: ChunkingParams {
            chunk_size: 100,
            overlap: 0,
        },
        ..EngineSettings::default()
    }
}

/// `n` paragraphs of ten words unique to each paragraph.
fn paragraphs(n: usize) -> String {
    (0..n)
        .map(|i| {
            (0..10)
                .map(|j| format!("p{}w{}", i, j))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn filler(chars: usize) -> String {
    "abcd ".repeat(chars / 5)
}

#[tokio::test]
async fn test_blank_document_gets_placeholder_chunk() {
    let h = harness();
    let ctx = RequestContext::new();
    let report = h.engine.ingest_text(&ctx, "blank.txt", "").await.unwrap();

    assert_eq!(report.chunks, 1);
    assert_eq!(h.engine.document_list(), vec!["blank.txt"]);
    let chunks = h.engine.registry().chunks("blank.txt").unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains("blank.txt"));
    assert_eq!(h.engine.document_state("blank.txt"), IndexState::FullyIndexed);
}

#[tokio::test]
async fn test_long_document_chunk_count() {
    let h = harness();
    let ctx = RequestContext::new();
    let text = filler(50_000);
    assert_eq!(text.chars().count(), 50_000);

    let report = h.engine.ingest_text(&ctx, "long.txt", &text).await.unwrap();
    // ceil((50000 - 200) / (1500 - 200)) = 39
    assert!(
        (38..=40).contains(&report.chunks),
        "got {} chunks",
        report.chunks
    );
    assert_eq!(report.vectors_persisted, report.chunks);
    assert_eq!(h.store.vector_count(), report.chunks);
}

#[tokio::test]
async fn test_summary_query_uses_full_context() {
    let h = harness();
    let ctx = RequestContext::new();
    let report = h
        .engine
        .ingest_text(&ctx, "doc.txt", &filler(12_500))
        .await
        .unwrap();
    assert_eq!(report.chunks, 10);

    let context = h
        .engine
        .document_context(&ctx, "саммари документа", &ContextRequest::default())
        .await
        .unwrap()
        .unwrap();
    assert!(context.contains("[doc.txt | document start]"));
    assert!(context.contains("[doc.txt | document end]"));
    assert!(context.contains("[doc.txt | chunk 5 of 10]"));
}

#[tokio::test]
async fn test_context_respects_budget() {
    let h = harness();
    let ctx = RequestContext::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        h.engine
            .ingest_text(&ctx, name, &filler(6_000))
            .await
            .unwrap();
    }

    for include_all_chunks in [Some(true), Some(false)] {
        let request = ContextRequest {
            include_all_chunks,
            max_context_length: 800,
            ..ContextRequest::default()
        };
        let context = h
            .engine
            .document_context(&ctx, "which value", &request)
            .await
            .unwrap()
            .unwrap();
        assert!(
            context.chars().count() <= 800 + TRUNCATION_MARKER.chars().count(),
            "{:?}: {} chars",
            include_all_chunks,
            context.chars().count()
        );
    }
}

#[tokio::test]
async fn test_full_context_limited_to_k_documents() {
    let h = harness();
    let ctx = RequestContext::new();
    let texts = [
        "pump station inspection schedule",
        "valve replacement parts list",
        "quarterly budget for the depot",
        "staff rota for the winter",
    ];
    for (i, text) in texts.iter().enumerate() {
        h.engine
            .ingest_text(&ctx, &format!("doc{}.txt", i), text)
            .await
            .unwrap();
    }

    let request = ContextRequest {
        k: 1,
        include_all_chunks: Some(true),
        ..ContextRequest::default()
    };
    let context = h
        .engine
        .document_context(&ctx, "valve replacement parts list", &request)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(context.matches("| document start]").count(), 1, "{}", context);
    assert!(context.contains("[doc1.txt | document start]"));
}

#[tokio::test]
async fn test_removal_is_idempotent() {
    let h = harness();
    let ctx = RequestContext::new();
    h.engine
        .ingest_text(&ctx, "gone.txt", &paragraphs(5))
        .await
        .unwrap();
    assert!(h.store.vector_count() > 0);

    assert!(h.engine.remove_document("gone.txt").await.unwrap());
    assert_eq!(h.store.vector_count(), 0);
    assert!(h.engine.document_list().is_empty());
    assert_eq!(h.engine.document_state("gone.txt"), IndexState::Unindexed);

    assert!(!h.engine.remove_document("gone.txt").await.unwrap());
    assert!(h
        .engine
        .query_documents(&ctx, "p1w1", 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_store_delete_keeps_document() {
    let h = harness_with(HashEmbedder::new(), small_chunks());
    let ctx = RequestContext::new();
    h.engine
        .ingest_text(&ctx, "keep.txt", &paragraphs(3))
        .await
        .unwrap();
    let vectors = h.store.vector_count();

    h.store.set_reject_deletes(true);
    let err = h.engine.remove_document("keep.txt").await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(h.engine.document_list(), vec!["keep.txt"]);
    assert_eq!(h.engine.document_state("keep.txt"), IndexState::FullyIndexed);
    assert_eq!(h.store.vector_count(), vectors);

    // Once the store recovers the removal goes through and sticks.
    h.store.set_reject_deletes(false);
    assert!(h.engine.remove_document("keep.txt").await.unwrap());
    let caps = h.engine.capabilities().clone();
    let restarted = DocumentEngine::new(caps, small_chunks());
    assert_eq!(restarted.restore().await.unwrap(), 0);
    assert!(restarted.document_list().is_empty());
}

#[tokio::test]
async fn test_chunk_text_finds_itself() {
    let h = harness_with(HashEmbedder::new(), small_chunks());
    let ctx = RequestContext::new();
    h.engine
        .ingest_text(&ctx, "para.txt", &paragraphs(8))
        .await
        .unwrap();

    let chunks = h.engine.registry().chunks("para.txt").unwrap();
    assert_eq!(chunks.len(), 8);
    let target = &chunks[3];

    let hits = h
        .engine
        .query_documents(&ctx, &target.content, 3)
        .await
        .unwrap();
    assert_eq!(hits[0].source, "para.txt");
    assert_eq!(hits[0].chunk, 3);
    assert!(hits[0].similarity > 0.999);
    assert_eq!(hits[0].level, ChunkLevel::Chunk);
}

#[tokio::test]
async fn test_reingest_replaces_vectors() {
    let h = harness_with(HashEmbedder::new(), small_chunks());
    let ctx = RequestContext::new();
    let first = h
        .engine
        .ingest_text(&ctx, "same.txt", &paragraphs(6))
        .await
        .unwrap();
    assert_eq!(h.store.vector_count(), 6);

    let second = h
        .engine
        .ingest_text(&ctx, "same.txt", "short replacement")
        .await
        .unwrap();
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunks, 1);
    assert_eq!(h.store.vector_count(), 1);
    assert_eq!(h.engine.document_list(), vec!["same.txt"]);
    assert_eq!(
        h.engine.registry().chunks("same.txt").unwrap()[0].content,
        "short replacement"
    );
}

#[tokio::test]
async fn test_partial_index_stays_searchable() {
    let embedder = HashEmbedder {
        fail_queries: false,
        poison: Some("p2w"),
    };
    let h = harness_with(embedder, small_chunks());
    let ctx = RequestContext::new();
    let report = h
        .engine
        .ingest_text(&ctx, "mixed.txt", &paragraphs(4))
        .await
        .unwrap();

    assert_eq!(report.state, IndexState::PartiallyIndexed);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(report.vectors_persisted, 3);

    let chunk3 = h.engine.registry().chunks("mixed.txt").unwrap()[3].content.clone();
    let hits = h.engine.query_documents(&ctx, &chunk3, 1).await.unwrap();
    assert_eq!(hits[0].chunk, 3);

    let err = h.engine.build_hierarchy(&ctx, "mixed.txt").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn test_batch_rejection_falls_back_to_single_inserts() {
    let h = harness();
    h.store.set_reject_batches(true);
    let ctx = RequestContext::new();
    let report = h
        .engine
        .ingest_text(&ctx, "fallback.txt", &filler(5_000))
        .await
        .unwrap();

    assert_eq!(report.state, IndexState::FullyIndexed);
    assert_eq!(report.vectors_persisted, report.chunks);
    assert_eq!(h.store.vector_count(), report.chunks);
}

#[tokio::test]
async fn test_hierarchy_build() {
    let store = Arc::new(InMemoryStore::new());
    let caps = Capabilities {
        embedder: Some(Arc::new(HashEmbedder::new())),
        generator: Some(Arc::new(FixedGenerator("A synthesis of twenty paragraphs."))),
        vector_store: Some(store.clone()),
        document_store: Some(store.clone()),
    };
    let engine = DocumentEngine::new(caps, small_chunks());
    let ctx = RequestContext::new();

    let report = engine
        .ingest_text(&ctx, "big.txt", &paragraphs(20))
        .await
        .unwrap();
    assert_eq!(report.chunks, 20);
    assert_eq!(report.state, IndexState::FullyIndexed);

    let hierarchy = engine.build_hierarchy(&ctx, "big.txt").await.unwrap();
    assert!(hierarchy.generated);
    assert_eq!(hierarchy.groups, 3);
    assert_eq!(hierarchy.level0_indexed, 11);
    assert_eq!(hierarchy.vectors_persisted, 15);
    assert_eq!(engine.document_state("big.txt"), IndexState::HierarchicallyIndexed);

    let vectors = store.all_vectors();
    assert_eq!(vectors.len(), 15);
    let summaries: Vec<_> = vectors
        .iter()
        .filter(|v| v.chunk_index == DOCUMENT_SUMMARY_INDEX)
        .collect();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].content, "A synthesis of twenty paragraphs.");
    assert_eq!(summaries[0].metadata.level, ChunkLevel::DocumentSummary);
    assert_eq!(
        vectors
            .iter()
            .filter(|v| v.chunk_index == GROUP_SUMMARY_INDEX)
            .count(),
        3
    );

    let hits = engine
        .smart_search(&ctx, "twenty paragraphs", 5, Some(SearchStrategy::Summary))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.level != ChunkLevel::Chunk));

    let detailed = engine
        .smart_search(&ctx, "p4w1 p4w2", 3, Some(SearchStrategy::Detailed))
        .await
        .unwrap();
    assert_eq!(detailed[0].level, ChunkLevel::Chunk);

    // Rebuilding is allowed and replaces the previous hierarchy.
    engine.build_hierarchy(&ctx, "big.txt").await.unwrap();
    assert_eq!(store.vector_count(), 15);
}

#[tokio::test]
async fn test_hierarchy_without_generator_uses_extract() {
    let h = harness_with(HashEmbedder::new(), small_chunks());
    let ctx = RequestContext::new();
    h.engine
        .ingest_text(&ctx, "plain.txt", &paragraphs(3))
        .await
        .unwrap();

    let report = h.engine.build_hierarchy(&ctx, "plain.txt").await.unwrap();
    assert!(!report.generated);
    let summary = h
        .store
        .all_vectors()
        .into_iter()
        .find(|v| v.chunk_index == DOCUMENT_SUMMARY_INDEX)
        .unwrap();
    assert!(summary.content.starts_with("Document: plain.txt"));

    let err = h.engine.build_hierarchy(&ctx, "missing.txt").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_query_embedding_failure_is_an_error() {
    let embedder = HashEmbedder {
        fail_queries: true,
        poison: None,
    };
    let h = harness_with(embedder, EngineSettings::default());
    let ctx = RequestContext::new();
    let report = h.engine.ingest_text(&ctx, "a.txt", "some text").await.unwrap();
    assert_eq!(report.state, IndexState::FullyIndexed);

    let err = h.engine.query_documents(&ctx, "text", 2).await.unwrap_err();
    assert!(matches!(err, EngineError::QueryFailure(_)));
    let err = h
        .engine
        .document_context(&ctx, "text", &ContextRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::QueryFailure(_)));
}

#[tokio::test]
async fn test_restore_from_document_store() {
    let store = Arc::new(InMemoryStore::new());
    let caps = Capabilities {
        embedder: Some(Arc::new(HashEmbedder::new())),
        generator: None,
        vector_store: Some(store.clone()),
        document_store: Some(store.clone()),
    };
    let ctx = RequestContext::new();

    let first = DocumentEngine::new(caps.clone(), small_chunks());
    first
        .ingest_text(&ctx, "kept.txt", &paragraphs(4))
        .await
        .unwrap();
    first.ingest_text(&ctx, "empty.txt", "").await.unwrap();

    let second = DocumentEngine::new(caps, small_chunks());
    assert_eq!(second.restore().await.unwrap(), 2);
    assert_eq!(second.document_list(), vec!["empty.txt", "kept.txt"]);
    assert_eq!(second.document_state("kept.txt"), IndexState::FullyIndexed);
    assert_eq!(second.registry().chunks("kept.txt").unwrap().len(), 4);

    let chunk2 = second.registry().chunks("kept.txt").unwrap()[2].content.clone();
    let hits = second.query_documents(&ctx, &chunk2, 1).await.unwrap();
    assert_eq!(hits[0].source, "kept.txt");
    assert_eq!(hits[0].chunk, 2);
}

#[tokio::test]
async fn test_concurrent_ingestion() {
    let h = harness();
    let ctx = RequestContext::new();
    let text_one = filler(4_000);
    let text_two = filler(4_000);
    let (a, b) = futures::join!(
        h.engine.ingest_text(&ctx, "one.txt", &text_one),
        h.engine.ingest_text(&ctx, "two.txt", &text_two),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.document_id, b.document_id);
    assert_eq!(h.engine.document_list(), vec!["one.txt", "two.txt"]);
    assert_eq!(h.store.vector_count(), a.chunks + b.chunks);
}
