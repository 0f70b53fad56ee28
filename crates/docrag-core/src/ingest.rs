//! Ingestion pipeline: text → chunks → embeddings → vector records.
//!
//! One call to [`Indexer::ingest_extraction`] handles one document:
//!
//! 1. Take the per-name writer lock.
//! 2. Chunk the extracted text (a placeholder chunk for empty text).
//! 3. Delete the document's previous vectors. A failure here aborts the
//!    ingest before anything is written.
//! 4. Upsert the [`Document`], keeping its id across re-ingestion.
//! 5. Embed chunks in batches; a failed batch is retried chunk by chunk and
//!    a failed chunk is skipped.
//! 6. Persist all records in one batch call, falling back to sequential
//!    inserts.
//! 7. Commit the registry entry.
//!
//! Without an embedder or a vector store the document is still chunked and
//! registered, but nothing is persisted and the report is flagged
//! `degraded`.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::Chunker;
use crate::context::{ProgressEvent, RequestContext};
use crate::embedding::Embedder;
use crate::engine::Capabilities;
use crate::error::{EngineError, Result};
use crate::models::{
    CachedChunk, ConfidenceRecord, Document, DocumentMetadata, Extraction, IndexState,
    VectorMetadata, VectorRecord,
};
use crate::registry::{DocumentRegistry, RegistryEntry};
use crate::store::{DocumentStore, VectorStore};

/// Default number of texts sent to [`Embedder::embed_batch`] at once.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub name: String,
    pub document_id: String,
    pub chunks: usize,
    pub vectors_persisted: usize,
    /// Chunks that failed to embed or persist.
    pub failed_chunks: usize,
    pub state: IndexState,
    /// `true` when retrieval capabilities were missing and nothing was
    /// persisted.
    pub degraded: bool,
}

/// Borrowed view over the engine state needed to ingest documents.
pub struct Indexer<'a> {
    caps: &'a Capabilities,
    registry: &'a DocumentRegistry,
    chunker: Chunker,
    batch_size: usize,
}

impl<'a> Indexer<'a> {
    pub fn new(
        caps: &'a Capabilities,
        registry: &'a DocumentRegistry,
        chunker: Chunker,
        batch_size: usize,
    ) -> Self {
        Self {
            caps,
            registry,
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest plain text that was read directly (confidence 1.0).
    pub async fn ingest(&self, ctx: &RequestContext, name: &str, text: &str) -> Result<IngestReport> {
        let extraction = Extraction {
            text: text.to_string(),
            confidence: ConfidenceRecord::exact(text, "text"),
            assets: Vec::new(),
        };
        self.ingest_extraction(ctx, name, extraction).await
    }

    /// Ingest extractor output. Re-ingesting a name replaces its chunks and
    /// vectors.
    pub async fn ingest_extraction(
        &self,
        ctx: &RequestContext,
        name: &str,
        extraction: Extraction,
    ) -> Result<IngestReport> {
        let writer = self.registry.writer(name);
        let _guard = writer.lock().await;

        let mut state = IndexState::Extracted;
        let chunks = self.chunker.chunk_document(name, &extraction.text);
        advance(&mut state, IndexState::Chunked);
        ctx.report(ProgressEvent::Chunked {
            name: name.to_string(),
            chunks: chunks.len(),
        });

        let document_id = self.resolve_document_id(name).await?;

        let (embedder, store) = match (&self.caps.embedder, &self.caps.vector_store) {
            (Some(embedder), Some(store)) => (embedder.clone(), store.clone()),
            _ => {
                self.upsert_document(name, &document_id, &extraction, chunks.len())
                    .await?;
                warn!(
                    document = name,
                    "retrieval unavailable; registered {} chunks without vectors",
                    chunks.len()
                );
                let report = IngestReport {
                    name: name.to_string(),
                    document_id: document_id.clone(),
                    chunks: chunks.len(),
                    vectors_persisted: 0,
                    failed_chunks: 0,
                    state,
                    degraded: true,
                };
                self.commit(name, document_id, chunks, extraction, state).await;
                return Ok(report);
            }
        };

        store
            .delete_vectors_by_document(&document_id)
            .await
            .map_err(|e| {
                warn!(document = name, "failed to clear previous vectors: {:#}", e);
                EngineError::Store(e)
            })?;
        self.upsert_document(name, &document_id, &extraction, chunks.len())
            .await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings =
            embed_texts(ctx, name, embedder.as_ref(), &texts, self.batch_size).await;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .filter_map(|(chunk, embedding)| {
                embedding.map(|embedding| VectorRecord {
                    document_id: document_id.clone(),
                    chunk_index: chunk.chunk_index as i64,
                    embedding,
                    content: chunk.content.clone(),
                    metadata: VectorMetadata::chunk(name),
                })
            })
            .collect();

        let persisted = persist_records(store.as_ref(), name, &records).await;
        ctx.report(ProgressEvent::Persisted {
            name: name.to_string(),
            vectors: persisted,
        });

        let failed = chunks.len().saturating_sub(persisted);
        if failed == 0 {
            advance(&mut state, IndexState::FullyIndexed);
        } else {
            advance(&mut state, IndexState::PartiallyIndexed);
        }

        info!(
            document = name,
            chunks = chunks.len(),
            vectors = persisted,
            failed,
            state = %state,
            "ingested"
        );

        let report = IngestReport {
            name: name.to_string(),
            document_id: document_id.clone(),
            chunks: chunks.len(),
            vectors_persisted: persisted,
            failed_chunks: failed,
            state,
            degraded: false,
        };
        self.commit(name, document_id, chunks, extraction, state).await;
        Ok(report)
    }

    /// Id of `name`: from the registry, else from the document store, else
    /// freshly minted.
    async fn resolve_document_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.registry.document_id(name) {
            return Ok(id);
        }
        if let Some(docs) = &self.caps.document_store {
            if let Some(existing) = docs.get_document(name).await? {
                return Ok(existing.id);
            }
        }
        Ok(Uuid::new_v4().to_string())
    }

    /// Create or update the persisted document. Without a document store
    /// the id lives only in the registry.
    async fn upsert_document(
        &self,
        name: &str,
        document_id: &str,
        extraction: &Extraction,
        chunk_count: usize,
    ) -> Result<()> {
        let Some(docs) = &self.caps.document_store else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp();
        let doc = Document {
            id: document_id.to_string(),
            filename: name.to_string(),
            content: extraction.text.clone(),
            metadata: DocumentMetadata {
                confidence_data: Some(extraction.confidence.clone()),
                chunk_count,
                index_state: Some(IndexState::Extracted),
            },
            created_at: now,
            updated_at: now,
        };
        docs.create_document(&doc).await?;
        Ok(())
    }

    async fn commit(
        &self,
        name: &str,
        document_id: String,
        chunks: Vec<CachedChunk>,
        extraction: Extraction,
        state: IndexState,
    ) {
        self.registry.commit(
            name,
            RegistryEntry {
                document_id,
                chunks: Arc::new(chunks),
                confidence: Some(extraction.confidence),
                assets: Arc::new(extraction.assets),
                state,
            },
        );
        if let Some(docs) = &self.caps.document_store {
            record_state(docs.as_ref(), name, state).await;
        }
    }
}

fn advance(state: &mut IndexState, next: IndexState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid transition {} -> {}",
        state,
        next
    );
    *state = next;
}

/// Store the committed lifecycle state on the persisted document.
///
/// Best-effort: a failure only affects state recovery after a restart.
pub(crate) async fn record_state(docs: &dyn DocumentStore, name: &str, state: IndexState) {
    let result = async {
        if let Some(mut doc) = docs.get_document(name).await? {
            doc.metadata.index_state = Some(state);
            doc.updated_at = chrono::Utc::now().timestamp();
            docs.create_document(&doc).await?;
        }
        anyhow::Ok(())
    }
    .await;
    if let Err(e) = result {
        warn!(document = name, "failed to record state {}: {:#}", state, e);
    }
}

/// Embed `texts` in batches of `batch_size`.
///
/// Returns one slot per input; `None` marks a text that could not be
/// embedded even on its own.
pub(crate) async fn embed_texts(
    ctx: &RequestContext,
    name: &str,
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Vec<Option<Vec<f32>>> {
    let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        match embedder.embed_batch(batch).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                out.extend(vectors.into_iter().map(Some));
            }
            Ok(vectors) => {
                warn!(
                    document = name,
                    "embedder returned {} vectors for {} texts; retrying one by one",
                    vectors.len(),
                    batch.len()
                );
                embed_each(name, embedder, batch, out.len(), &mut out).await;
            }
            Err(e) => {
                debug!(document = name, "batch embedding failed: {:#}", e);
                embed_each(name, embedder, batch, out.len(), &mut out).await;
            }
        }
        ctx.report(ProgressEvent::Embedded {
            name: name.to_string(),
            done: out.len(),
            total: texts.len(),
        });
    }

    out
}

async fn embed_each(
    name: &str,
    embedder: &dyn Embedder,
    batch: &[String],
    offset: usize,
    out: &mut Vec<Option<Vec<f32>>>,
) {
    for (i, text) in batch.iter().enumerate() {
        match embedder.embed(text).await {
            Ok(vector) => out.push(Some(vector)),
            Err(e) => {
                let err = EngineError::Embedding(format!("{:#}", e));
                warn!(document = name, position = offset + i, "skipping: {}", err);
                out.push(None);
            }
        }
    }
}

/// Persist `records`, preferring one batch call.
///
/// Returns how many records were stored. On batch failure each record is
/// inserted on its own and individual failures are skipped.
pub(crate) async fn persist_records(
    store: &dyn VectorStore,
    name: &str,
    records: &[VectorRecord],
) -> usize {
    if records.is_empty() {
        return 0;
    }

    match store.create_vectors_batch(records).await {
        Ok(created) => created,
        Err(e) => {
            warn!(
                document = name,
                "batch insert of {} vectors failed, inserting sequentially: {:#}",
                records.len(),
                e
            );
            let mut created = 0;
            for record in records {
                match store.create_vector(record).await {
                    Ok(_) => created += 1,
                    Err(e) => warn!(
                        document = name,
                        chunk = record.chunk_index,
                        "skipping vector: {:#}",
                        e
                    ),
                }
            }
            created
        }
    }
}
