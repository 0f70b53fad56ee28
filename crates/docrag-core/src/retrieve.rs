//! Adaptive retrieval under a context-size budget.
//!
//! A query is classified by keyword cues into a whole-document question
//! ("give me an overview", "саммари документа") or a detail question
//! ("which clause", "найди дату"). Both strategies start with a vector
//! similarity search to find the relevant documents:
//!
//! - **Full context** samples representative chunks across each relevant
//!   document from the chunk cache: first, last and an evenly strided set
//!   of interior chunks. Fragments are appended in `(name, chunk_index)`
//!   order until the next one would exceed the budget.
//! - **Detail** widens the search, opens with the first chunk of every
//!   relevant document and then appends the best matches. The joined text
//!   is cut to the budget and [`TRUNCATION_MARKER`] is appended when cut.
//!
//! The retriever never writes; dropping a future mid-assembly is safe.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::context::RequestContext;
use crate::embedding::Embedder;
use crate::engine::Capabilities;
use crate::error::{EngineError, Result};
use crate::models::{CachedChunk, ChunkLevel, VectorRecord};
use crate::registry::DocumentRegistry;
use crate::store::{ScoredVector, SearchFilter, VectorStore};

pub const DEFAULT_K: usize = 2;
pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 30_000;
pub const DEFAULT_DETAIL_MIN_K: usize = 8;
pub const DEFAULT_FULL_CONTEXT_SAMPLES: usize = 18;

/// Appended to detail context that was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... context truncated ...]";

const WHOLE_DOCUMENT_CUES: &[&str] = &[
    "summar",
    "overview",
    "outline",
    "structure",
    "table of contents",
    "main points",
    "key points",
    "main idea",
    "whole document",
    "entire document",
    "what is this document about",
    "what is the document about",
    "tldr",
    "tl dr",
    "gist",
    "саммари",
    "обзор",
    "резюме",
    "кратк",
    "о чем",
    "о чём",
    "структур",
    "содержани",
    "основные мысли",
    "весь документ",
    "целиком",
    "суть",
];

const DETAIL_CUES: &[&str] = &[
    "exact",
    "quote",
    "which",
    "where",
    "when",
    "how many",
    "how much",
    "specific",
    "find",
    "page",
    "date",
    "number",
    "value",
    "где",
    "найди",
    "найти",
    "конкретн",
    "точн",
    "цитат",
    "какой",
    "какая",
    "какие",
    "сколько",
    "когда",
    "дата",
];

/// What a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    WholeDocument,
    Detail,
}

/// Classify a query by counting whole-document and detail cues.
///
/// Cues match at word starts, so `"summar"` covers "summary" and
/// "summarize" and `"конкретн"` covers every inflection. Whole-document
/// wins only when its cues strictly outnumber the detail cues.
pub fn classify_query(query: &str) -> QueryIntent {
    let normalized = normalize(query);
    let count = |cues: &[&str]| {
        cues.iter()
            .filter(|cue| normalized.contains(&format!(" {}", cue)))
            .count()
    };
    if count(WHOLE_DOCUMENT_CUES) > count(DETAIL_CUES) {
        QueryIntent::WholeDocument
    } else {
        QueryIntent::Detail
    }
}

/// Lowercase, collapse every non-alphanumeric run to one space, pad with
/// spaces.
fn normalize(query: &str) -> String {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

/// Level selection for [`Retriever::smart_search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Level-2 and level-1 summaries only.
    Summary,
    /// Every level, raw chunks first.
    Detailed,
}

impl From<QueryIntent> for SearchStrategy {
    fn from(intent: QueryIntent) -> Self {
        match intent {
            QueryIntent::WholeDocument => SearchStrategy::Summary,
            QueryIntent::Detail => SearchStrategy::Detailed,
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "summary" => Ok(SearchStrategy::Summary),
            "detailed" => Ok(SearchStrategy::Detailed),
            other => Err(format!(
                "unknown strategy '{}', expected 'summary' or 'detailed'",
                other
            )),
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStrategy::Summary => f.write_str("summary"),
            SearchStrategy::Detailed => f.write_str("detailed"),
        }
    }
}

/// Parameters of a context request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    pub k: usize,
    /// `Some(true)` forces full context, `Some(false)` forces detail,
    /// `None` classifies the query.
    pub include_all_chunks: Option<bool>,
    /// Budget in characters.
    pub max_context_length: usize,
}

impl Default for ContextRequest {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            include_all_chunks: None,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }
}

/// Retrieval tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Minimum search breadth of the detail strategy.
    pub detail_min_k: usize,
    /// Interior chunks sampled per document by the full-context strategy.
    pub full_context_samples: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            detail_min_k: DEFAULT_DETAIL_MIN_K,
            full_context_samples: DEFAULT_FULL_CONTEXT_SAMPLES,
        }
    }
}

/// One search result as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub content: String,
    /// Document name.
    pub source: String,
    /// Chunk index; negative for summaries.
    pub chunk: i64,
    pub similarity: f32,
    pub level: ChunkLevel,
}

/// Read-only view over engine state answering queries.
pub struct Retriever<'a> {
    caps: &'a Capabilities,
    registry: &'a DocumentRegistry,
    params: RetrievalParams,
}

impl<'a> Retriever<'a> {
    pub fn new(caps: &'a Capabilities, registry: &'a DocumentRegistry, params: RetrievalParams) -> Self {
        Self {
            caps,
            registry,
            params,
        }
    }

    fn capabilities(&self) -> Option<(Arc<dyn Embedder>, Arc<dyn VectorStore>)> {
        match (&self.caps.embedder, &self.caps.vector_store) {
            (Some(embedder), Some(store)) => Some((embedder.clone(), store.clone())),
            _ => None,
        }
    }

    fn require(&self) -> Result<(Arc<dyn Embedder>, Arc<dyn VectorStore>)> {
        self.capabilities().ok_or_else(|| {
            EngineError::StoreUnavailable("no embedder or vector store configured".to_string())
        })
    }

    /// Assemble a context string for `query`.
    ///
    /// `Ok(None)` when retrieval is unavailable or nothing is registered;
    /// `Err(QueryFailure)` when the query could not be embedded or searched.
    pub async fn context(
        &self,
        _ctx: &RequestContext,
        query: &str,
        request: &ContextRequest,
    ) -> Result<Option<String>> {
        if self.registry.is_empty() {
            return Ok(None);
        }
        let Some((embedder, store)) = self.capabilities() else {
            debug!("context requested without retrieval capabilities");
            return Ok(None);
        };

        let intent = match request.include_all_chunks {
            Some(true) => QueryIntent::WholeDocument,
            Some(false) => QueryIntent::Detail,
            None => classify_query(query),
        };
        // Only the detail strategy widens the search beyond `k`.
        let breadth = match intent {
            QueryIntent::WholeDocument => request.k.max(1),
            QueryIntent::Detail => request.k.max(self.params.detail_min_k),
        };
        debug!(?intent, breadth, "assembling context");

        let embedding = embed_query(embedder.as_ref(), query).await?;
        let hits = run_search(store.as_ref(), &embedding, breadth, &SearchFilter::default()).await?;

        let context = match intent {
            QueryIntent::WholeDocument => self.full_context(&hits, request.max_context_length),
            QueryIntent::Detail => self.detail_context(&hits, request.max_context_length),
        };
        Ok(context.filter(|c| !c.is_empty()))
    }

    /// Top-`k` matches across all levels.
    pub async fn query(&self, _ctx: &RequestContext, query: &str, k: usize) -> Result<Vec<QueryHit>> {
        let (embedder, store) = self.require()?;
        if self.registry.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = embed_query(embedder.as_ref(), query).await?;
        let hits = run_search(store.as_ref(), &embedding, k, &SearchFilter::default()).await?;
        Ok(self.to_hits(hits))
    }

    /// Level-aware search.
    ///
    /// `Summary` searches level-2 and level-1 vectors and falls back to all
    /// levels when no summaries exist. `Detailed` searches every level and
    /// lists raw chunks before summaries. Without an explicit strategy the
    /// query is classified.
    pub async fn smart_search(
        &self,
        _ctx: &RequestContext,
        query: &str,
        k: usize,
        strategy: Option<SearchStrategy>,
    ) -> Result<Vec<QueryHit>> {
        let (embedder, store) = self.require()?;
        if self.registry.is_empty() {
            return Ok(Vec::new());
        }
        let strategy = strategy.unwrap_or_else(|| classify_query(query).into());
        debug!(%strategy, "smart search");
        let embedding = embed_query(embedder.as_ref(), query).await?;

        let hits = match strategy {
            SearchStrategy::Summary => {
                let filter =
                    SearchFilter::levels(&[ChunkLevel::DocumentSummary, ChunkLevel::GroupSummary]);
                let hits = run_search(store.as_ref(), &embedding, k, &filter).await?;
                if hits.is_empty() {
                    debug!("no summary vectors, searching all levels");
                    run_search(store.as_ref(), &embedding, k, &SearchFilter::default()).await?
                } else {
                    hits
                }
            }
            SearchStrategy::Detailed => {
                let breadth = k.max(self.params.detail_min_k);
                let mut hits =
                    run_search(store.as_ref(), &embedding, breadth, &SearchFilter::default())
                        .await?;
                hits.sort_by_key(|h| h.record.metadata.level != ChunkLevel::Chunk);
                hits.truncate(k);
                hits
            }
        };
        Ok(self.to_hits(hits))
    }

    fn to_hits(&self, hits: Vec<ScoredVector>) -> Vec<QueryHit> {
        hits.into_iter()
            .filter_map(|hit| {
                let source = self.registry.name_for_id(&hit.record.document_id)?;
                Some(QueryHit {
                    content: hit.record.content,
                    source,
                    chunk: hit.record.chunk_index,
                    similarity: hit.similarity,
                    level: hit.record.metadata.level,
                })
            })
            .collect()
    }

    fn full_context(&self, hits: &[ScoredVector], max_len: usize) -> Option<String> {
        let mut names: BTreeSet<String> = hits
            .iter()
            .filter_map(|h| self.registry.name_for_id(&h.record.document_id))
            .collect();
        if names.is_empty() {
            debug!("no matching documents, using every registered document");
            names = self.registry.names().into_iter().collect();
        }

        let mut out = String::new();
        let mut out_len = 0usize;
        for name in &names {
            let Some(chunks) = self.registry.chunks(name) else {
                continue;
            };
            for i in key_chunk_indices(chunks.len(), self.params.full_context_samples) {
                let fragment = fragment(name, &chunks, i);
                let separator = if out.is_empty() { 0 } else { 2 };
                let len = fragment.chars().count();
                if out_len + separator + len > max_len {
                    if out.is_empty() {
                        return Some(truncate_with_marker(fragment, max_len));
                    }
                    return Some(out);
                }
                if separator > 0 {
                    out.push_str("\n\n");
                }
                out.push_str(&fragment);
                out_len += separator + len;
            }
        }
        Some(out)
    }

    fn detail_context(&self, hits: &[ScoredVector], max_len: usize) -> Option<String> {
        let mut relevant: Vec<String> = Vec::new();
        for hit in hits {
            if let Some(name) = self.registry.name_for_id(&hit.record.document_id) {
                if !relevant.contains(&name) {
                    relevant.push(name);
                }
            }
        }
        if relevant.is_empty() {
            return None;
        }

        let mut seen: HashSet<(String, i64, Option<usize>)> = HashSet::new();
        let mut parts: Vec<String> = Vec::new();
        for name in &relevant {
            if let Some(chunks) = self.registry.chunks(name) {
                if !chunks.is_empty() {
                    parts.push(fragment(name, &chunks, 0));
                    seen.insert((name.clone(), 0, None));
                }
            }
        }

        for hit in hits {
            let Some(name) = self.registry.name_for_id(&hit.record.document_id) else {
                continue;
            };
            let key = (
                name.clone(),
                hit.record.chunk_index,
                hit.record.metadata.summary_index,
            );
            if !seen.insert(key) {
                continue;
            }
            let count = self.registry.chunks(&name).map(|c| c.len()).unwrap_or(0);
            parts.push(format!("{}\n{}", hit_marker(&name, &hit.record, count), hit.record.content));
        }

        Some(truncate_with_marker(parts.join("\n\n"), max_len))
    }
}

async fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>> {
    embedder
        .embed(query)
        .await
        .map_err(|e| EngineError::QueryFailure(format!("query embedding failed: {:#}", e)))
}

async fn run_search(
    store: &dyn VectorStore,
    embedding: &[f32],
    limit: usize,
    filter: &SearchFilter,
) -> Result<Vec<ScoredVector>> {
    store
        .similarity_search(embedding, limit, filter)
        .await
        .map_err(|e| EngineError::QueryFailure(format!("similarity search failed: {:#}", e)))
}

/// Chunk positions used by the full-context strategy: the first, the last
/// and up to `samples` evenly strided interior chunks, ascending.
pub fn key_chunk_indices(count: usize, samples: usize) -> Vec<usize> {
    match count {
        0 => Vec::new(),
        1 => vec![0],
        _ => {
            let interior = count - 2;
            let mut picked = vec![0];
            if interior <= samples {
                picked.extend(1..count - 1);
            } else {
                picked.extend((0..samples).map(|j| 1 + j * interior / samples));
            }
            picked.push(count - 1);
            picked
        }
    }
}

/// Marker line placed before a chunk in assembled context.
pub fn chunk_marker(name: &str, index: usize, count: usize) -> String {
    if index == 0 {
        format!("[{} | document start]", name)
    } else if index + 1 == count {
        format!("[{} | document end]", name)
    } else {
        format!("[{} | chunk {} of {}]", name, index + 1, count)
    }
}

fn hit_marker(name: &str, record: &VectorRecord, count: usize) -> String {
    match record.metadata.level {
        ChunkLevel::Chunk => chunk_marker(name, record.chunk_index.max(0) as usize, count),
        ChunkLevel::GroupSummary => match record.metadata.chunk_range {
            Some((first, last)) => {
                format!("[{} | summary of chunks {}-{}]", name, first + 1, last + 1)
            }
            None => format!("[{} | section summary]", name),
        },
        ChunkLevel::DocumentSummary => format!("[{} | document summary]", name),
    }
}

fn fragment(name: &str, chunks: &[CachedChunk], position: usize) -> String {
    let chunk = &chunks[position];
    format!(
        "{}\n{}",
        chunk_marker(name, chunk.chunk_index, chunks.len()),
        chunk.content
    )
}

fn truncate_with_marker(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let mut cut: String = text.chars().take(max_len).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
