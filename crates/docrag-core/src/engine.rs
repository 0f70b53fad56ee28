//! Engine facade consumed by the chat/agent layer and the CLI.
//!
//! [`DocumentEngine`] owns the resolved [`Capabilities`], the
//! [`DocumentRegistry`] and the tuning parameters, and hands out short-lived
//! [`Indexer`], [`HierarchicalSummarizer`] and [`Retriever`] views over them.
//!
//! Every method is async and runtime-agnostic. Synchronous callers go
//! through the blocking adapter of the app crate.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::{Chunker, ChunkingParams};
use crate::context::RequestContext;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::generation::Generator;
use crate::hierarchy::{DocumentHierarchy, HierarchicalSummarizer, HierarchyParams, HierarchyReport};
use crate::ingest::{IngestReport, Indexer, DEFAULT_EMBED_BATCH_SIZE};
use crate::models::{AssetRef, Extraction, IndexState};
use crate::registry::{DocumentRegistry, RegistryEntry};
use crate::retrieve::{ContextRequest, QueryHit, RetrievalParams, Retriever, SearchStrategy};
use crate::store::{DocumentStore, VectorStore};

/// Words below this confidence are flagged in confidence reports.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Capabilities resolved once at startup. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub generator: Option<Arc<dyn Generator>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub document_store: Option<Arc<dyn DocumentStore>>,
}

impl Capabilities {
    /// Both an embedder and a vector store are present.
    pub fn retrieval_available(&self) -> bool {
        self.embedder.is_some() && self.vector_store.is_some()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("embedder", &self.embedder.as_ref().map(|e| e.model_name().to_string()))
            .field("generator", &self.generator.as_ref().map(|g| g.model_name().to_string()))
            .field("vector_store", &self.vector_store.is_some())
            .field("document_store", &self.document_store.is_some())
            .finish()
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub chunking: ChunkingParams,
    pub embed_batch_size: usize,
    pub hierarchy: HierarchyParams,
    pub retrieval: RetrievalParams,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            hierarchy: HierarchyParams::default(),
            retrieval: RetrievalParams::default(),
        }
    }
}

/// Per-document line of a [`ConfidenceReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentConfidence {
    pub name: String,
    pub confidence: f32,
    pub text_length: usize,
    pub file_type: String,
    pub low_confidence_words: usize,
}

/// Extraction quality across all registered documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceReport {
    pub total_documents: usize,
    pub documents: Vec<DocumentConfidence>,
    /// Mean over documents that carry a confidence record; `0.0` if none.
    pub average_confidence: f32,
    /// Recognized text with words below [`LOW_CONFIDENCE_THRESHOLD`]
    /// written as `[?word]`.
    pub formatted_texts: Vec<String>,
}

/// The document RAG engine.
pub struct DocumentEngine {
    caps: Capabilities,
    registry: DocumentRegistry,
    settings: EngineSettings,
}

impl DocumentEngine {
    pub fn new(caps: Capabilities, settings: EngineSettings) -> Self {
        Self {
            caps,
            registry: DocumentRegistry::new(),
            settings,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Whether queries can reach a vector store. `false` means documents
    /// are listed but never retrieved.
    pub fn retrieval_available(&self) -> bool {
        self.caps.retrieval_available()
    }

    fn indexer(&self) -> Indexer<'_> {
        Indexer::new(
            &self.caps,
            &self.registry,
            Chunker::new(self.settings.chunking),
            self.settings.embed_batch_size,
        )
    }

    fn summarizer(&self) -> HierarchicalSummarizer<'_> {
        HierarchicalSummarizer::new(
            &self.caps,
            &self.registry,
            self.settings.hierarchy,
            self.settings.embed_batch_size,
        )
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever::new(&self.caps, &self.registry, self.settings.retrieval)
    }

    /// Registered document names, sorted.
    pub fn document_list(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn document_state(&self, name: &str) -> IndexState {
        self.registry.state(name)
    }

    pub fn document_assets(&self, name: &str) -> Vec<AssetRef> {
        self.registry
            .get(name)
            .map(|e| e.assets.as_ref().clone())
            .unwrap_or_default()
    }

    pub async fn ingest_text(
        &self,
        ctx: &RequestContext,
        name: &str,
        text: &str,
    ) -> Result<IngestReport> {
        self.indexer().ingest(ctx, name, text).await
    }

    pub async fn ingest_extraction(
        &self,
        ctx: &RequestContext,
        name: &str,
        extraction: Extraction,
    ) -> Result<IngestReport> {
        self.indexer().ingest_extraction(ctx, name, extraction).await
    }

    pub async fn build_hierarchy(&self, ctx: &RequestContext, name: &str) -> Result<HierarchyReport> {
        self.summarizer().build(ctx, name).await
    }

    pub async fn summarize(&self, ctx: &RequestContext, name: &str) -> Result<DocumentHierarchy> {
        self.summarizer().summarize(ctx, name).await
    }

    pub async fn document_context(
        &self,
        ctx: &RequestContext,
        query: &str,
        request: &ContextRequest,
    ) -> Result<Option<String>> {
        self.retriever().context(ctx, query, request).await
    }

    pub async fn query_documents(
        &self,
        ctx: &RequestContext,
        query: &str,
        k: usize,
    ) -> Result<Vec<QueryHit>> {
        self.retriever().query(ctx, query, k).await
    }

    pub async fn smart_search(
        &self,
        ctx: &RequestContext,
        query: &str,
        k: usize,
        strategy: Option<SearchStrategy>,
    ) -> Result<Vec<QueryHit>> {
        self.retriever().smart_search(ctx, query, k, strategy).await
    }

    /// Remove a document with its chunks, confidence record, assets,
    /// vectors and persisted row. Returns `false` for unknown names.
    ///
    /// A store failure leaves the document registered and is returned, so
    /// the caller can retry instead of seeing it resurface on restore.
    pub async fn remove_document(&self, name: &str) -> Result<bool> {
        let writer = self.registry.writer(name);
        let _guard = writer.lock().await;

        let Some(entry) = self.registry.get(name) else {
            return Ok(false);
        };

        if let Some(store) = &self.caps.vector_store {
            store
                .delete_vectors_by_document(&entry.document_id)
                .await
                .map_err(|e| {
                    warn!(document = name, "failed to delete vectors: {:#}", e);
                    EngineError::Store(e)
                })?;
        }
        if let Some(docs) = &self.caps.document_store {
            docs.delete_document(&entry.document_id).await.map_err(|e| {
                warn!(document = name, "failed to delete document: {:#}", e);
                EngineError::Store(e)
            })?;
        }

        if let Err(e) = self.registry.transition(name, IndexState::Removed) {
            warn!(document = name, "{}", e);
        }
        self.registry.remove(name);
        info!(document = name, "removed");
        Ok(true)
    }

    /// Summarize extraction confidence for every registered document.
    pub fn confidence_report(&self) -> ConfidenceReport {
        let mut documents = Vec::new();
        let mut formatted_texts = Vec::new();

        for (name, entry) in self.registry.snapshot() {
            let Some(record) = entry.confidence else {
                continue;
            };
            let low = record
                .words
                .iter()
                .filter(|w| w.confidence < LOW_CONFIDENCE_THRESHOLD)
                .count();
            if record.words.is_empty() {
                formatted_texts.push(format!(
                    "{}: confidence {:.2} ({}, {} characters)",
                    name, record.confidence, record.file_type, record.text_length
                ));
            } else {
                let text = record
                    .words
                    .iter()
                    .map(|w| {
                        if w.confidence < LOW_CONFIDENCE_THRESHOLD {
                            format!("[?{}]", w.word)
                        } else {
                            w.word.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                formatted_texts.push(format!("{}: {}", name, text));
            }
            documents.push(DocumentConfidence {
                name,
                confidence: record.confidence,
                text_length: record.text_length,
                file_type: record.file_type,
                low_confidence_words: low,
            });
        }

        let average_confidence = if documents.is_empty() {
            0.0
        } else {
            documents.iter().map(|d| d.confidence).sum::<f32>() / documents.len() as f32
        };

        ConfidenceReport {
            total_documents: self.registry.len(),
            documents,
            average_confidence,
            formatted_texts,
        }
    }

    /// Rebuild the registry from the document store.
    ///
    /// Chunks are recomputed from stored content with the current chunking
    /// parameters; the lifecycle state comes from document metadata.
    /// Binary assets are not persisted and come back empty. Returns the
    /// number of restored documents.
    pub async fn restore(&self) -> Result<usize> {
        let Some(docs) = &self.caps.document_store else {
            return Ok(0);
        };
        let chunker = Chunker::new(self.settings.chunking);
        let mut restored = 0;

        for doc in docs.get_all_documents().await? {
            let chunks = chunker.chunk_document(&doc.filename, &doc.content);
            let state = match doc.metadata.index_state {
                Some(state) if state != IndexState::Removed => state,
                _ => match &self.caps.vector_store {
                    Some(store) if store.count_vectors(&doc.id).await? > 0 => {
                        IndexState::FullyIndexed
                    }
                    _ => IndexState::Chunked,
                },
            };
            self.registry.commit(
                &doc.filename,
                RegistryEntry {
                    document_id: doc.id,
                    chunks: Arc::new(chunks),
                    confidence: doc.metadata.confidence_data,
                    assets: Arc::new(Vec::new()),
                    state,
                },
            );
            restored += 1;
        }

        info!(documents = restored, "registry restored");
        Ok(restored)
    }
}
