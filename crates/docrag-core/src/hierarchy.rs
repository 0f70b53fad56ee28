//! Three-level hierarchical index for large documents.
//!
//! | Level | Content | `chunk_index` |
//! |-------|---------|---------------|
//! | 0 | raw chunks (first, last and every second one are indexed) | `>= 0` |
//! | 1 | one preview per group of `group_size` consecutive chunks | `-1` |
//! | 2 | whole-document synthesis | `-2` |
//!
//! The level-2 synthesis comes from a [`Generator`](crate::generation::Generator)
//! when one is configured. Without one, or when it fails, a deterministic
//! extract (name, length, chunk count, opening text) stands in.

use tracing::{info, warn};

use crate::context::{ProgressEvent, RequestContext};
use crate::engine::Capabilities;
use crate::error::{EngineError, Result};
use crate::ingest::{embed_texts, persist_records, record_state};
use crate::models::{
    CachedChunk, IndexState, VectorMetadata, VectorRecord, DOCUMENT_SUMMARY_INDEX,
    GROUP_SUMMARY_INDEX,
};
use crate::registry::DocumentRegistry;

pub const DEFAULT_GROUP_SIZE: usize = 8;
pub const DEFAULT_GROUP_PREVIEW_CHARS: usize = 2_000;
pub const DEFAULT_PROMPT_CHAR_CAP: usize = 15_000;
pub const DEFAULT_FALLBACK_CHARS: usize = 2_000;

/// Chunks always taken from each end of the document for the prompt.
const EDGE_CHUNKS: usize = 3;

/// Sizing for the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyParams {
    pub group_size: usize,
    pub group_preview_chars: usize,
    pub prompt_char_cap: usize,
    pub fallback_chars: usize,
}

impl Default for HierarchyParams {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            group_preview_chars: DEFAULT_GROUP_PREVIEW_CHARS,
            prompt_char_cap: DEFAULT_PROMPT_CHAR_CAP,
            fallback_chars: DEFAULT_FALLBACK_CHARS,
        }
    }
}

/// A level-1 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub summary_index: usize,
    /// Inclusive range of level-0 chunk indices.
    pub chunk_range: (usize, usize),
    pub text: String,
}

/// The in-memory hierarchy of one document.
#[derive(Debug, Clone)]
pub struct DocumentHierarchy {
    pub name: String,
    pub groups: Vec<GroupSummary>,
    pub summary: String,
    /// `false` when the level-2 summary is the deterministic fallback.
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyReport {
    pub name: String,
    pub groups: usize,
    pub level0_indexed: usize,
    pub vectors_persisted: usize,
    pub vectors_failed: usize,
    pub generated: bool,
}

/// Builds and indexes document hierarchies.
pub struct HierarchicalSummarizer<'a> {
    caps: &'a Capabilities,
    registry: &'a DocumentRegistry,
    params: HierarchyParams,
    batch_size: usize,
}

impl<'a> HierarchicalSummarizer<'a> {
    pub fn new(
        caps: &'a Capabilities,
        registry: &'a DocumentRegistry,
        params: HierarchyParams,
        batch_size: usize,
    ) -> Self {
        Self {
            caps,
            registry,
            params,
            batch_size,
        }
    }

    /// Build the hierarchy of a registered document without persisting it.
    pub async fn summarize(&self, ctx: &RequestContext, name: &str) -> Result<DocumentHierarchy> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let text_length = entry
            .confidence
            .as_ref()
            .map(|c| c.text_length)
            .unwrap_or_else(|| entry.chunks.iter().map(|c| c.content.chars().count()).sum());

        let groups = group_summaries(&entry.chunks, &self.params);
        let (summary, generated) = self.document_summary(ctx, name, text_length, &entry.chunks).await;
        ctx.report(ProgressEvent::SummaryGenerated {
            name: name.to_string(),
            fallback: !generated,
        });

        Ok(DocumentHierarchy {
            name: name.to_string(),
            groups,
            summary,
            generated,
        })
    }

    /// Replace the document's vectors with its hierarchical index.
    ///
    /// Allowed from `FullyIndexed`, or from `HierarchicallyIndexed` to
    /// rebuild. Succeeds when at least one vector was persisted.
    pub async fn build(&self, ctx: &RequestContext, name: &str) -> Result<HierarchyReport> {
        let writer = self.registry.writer(name);
        let _guard = writer.lock().await;

        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        if !entry.state.can_transition_to(IndexState::HierarchicallyIndexed) {
            return Err(EngineError::InvalidState {
                name: name.to_string(),
                state: entry.state,
                action: "build a hierarchy",
            });
        }
        let (Some(embedder), Some(store)) = (&self.caps.embedder, &self.caps.vector_store) else {
            return Err(EngineError::StoreUnavailable(
                "hierarchical indexing needs an embedder and a vector store".to_string(),
            ));
        };

        let hierarchy = self.summarize(ctx, name).await?;
        let sample = level0_sample(entry.chunks.len());

        let mut pending: Vec<(i64, String, VectorMetadata)> = Vec::new();
        pending.push((
            DOCUMENT_SUMMARY_INDEX,
            hierarchy.summary.clone(),
            VectorMetadata::document_summary(name),
        ));
        for group in &hierarchy.groups {
            pending.push((
                GROUP_SUMMARY_INDEX,
                group.text.clone(),
                VectorMetadata::group_summary(name, group.summary_index, group.chunk_range),
            ));
        }
        for &i in &sample {
            let chunk = &entry.chunks[i];
            pending.push((
                chunk.chunk_index as i64,
                chunk.content.clone(),
                VectorMetadata::chunk(name),
            ));
        }

        let texts: Vec<String> = pending.iter().map(|(_, text, _)| text.clone()).collect();
        let embeddings = embed_texts(ctx, name, embedder.as_ref(), &texts, self.batch_size).await;

        let records: Vec<VectorRecord> = pending
            .into_iter()
            .zip(embeddings)
            .filter_map(|((chunk_index, content, metadata), embedding)| {
                embedding.map(|embedding| VectorRecord {
                    document_id: entry.document_id.clone(),
                    chunk_index,
                    embedding,
                    content,
                    metadata,
                })
            })
            .collect();

        // Keep the flat index when nothing could be embedded.
        if records.is_empty() {
            return Err(EngineError::Indexing {
                name: name.to_string(),
                reason: "no hierarchy vector could be embedded".to_string(),
            });
        }

        store.delete_vectors_by_document(&entry.document_id).await?;
        let persisted = persist_records(store.as_ref(), name, &records).await;
        if persisted == 0 {
            return Err(EngineError::Indexing {
                name: name.to_string(),
                reason: "no hierarchy vector could be persisted".to_string(),
            });
        }
        ctx.report(ProgressEvent::Persisted {
            name: name.to_string(),
            vectors: persisted,
        });

        self.registry
            .transition(name, IndexState::HierarchicallyIndexed)?;
        if let Some(docs) = &self.caps.document_store {
            record_state(docs.as_ref(), name, IndexState::HierarchicallyIndexed).await;
        }

        let total = texts.len();
        info!(
            document = name,
            groups = hierarchy.groups.len(),
            vectors = persisted,
            failed = total.saturating_sub(persisted),
            generated = hierarchy.generated,
            "hierarchy indexed"
        );

        Ok(HierarchyReport {
            name: name.to_string(),
            groups: hierarchy.groups.len(),
            level0_indexed: sample.len(),
            vectors_persisted: persisted,
            vectors_failed: total.saturating_sub(persisted),
            generated: hierarchy.generated,
        })
    }

    async fn document_summary(
        &self,
        ctx: &RequestContext,
        name: &str,
        text_length: usize,
        chunks: &[CachedChunk],
    ) -> (String, bool) {
        if let Some(generator) = &self.caps.generator {
            let prompt = summary_prompt(name, chunks, self.params.prompt_char_cap);
            match generator.generate(&prompt, ctx.stream_generation).await {
                Ok(text) if !text.trim().is_empty() => return (text.trim().to_string(), true),
                Ok(_) => warn!(document = name, "generator returned an empty summary"),
                Err(e) => warn!(
                    document = name,
                    model = generator.model_name(),
                    "summary generation failed: {:#}",
                    e
                ),
            }
        }
        (
            fallback_summary(name, text_length, chunks, self.params.fallback_chars),
            false,
        )
    }
}

/// Level-1 previews: consecutive groups of `group_size` chunks joined and
/// cut to `group_preview_chars`.
pub fn group_summaries(chunks: &[CachedChunk], params: &HierarchyParams) -> Vec<GroupSummary> {
    chunks
        .chunks(params.group_size.max(1))
        .enumerate()
        .map(|(summary_index, group)| {
            let joined = group
                .iter()
                .map(|c| c.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let first = group.first().map(|c| c.chunk_index).unwrap_or(0);
            let last = group.last().map(|c| c.chunk_index).unwrap_or(first);
            GroupSummary {
                summary_index,
                chunk_range: (first, last),
                text: take_chars(&joined, params.group_preview_chars),
            }
        })
        .collect()
}

/// Positions of the level-0 chunks indexed alongside the summaries:
/// the first, the last and every second chunk.
pub fn level0_sample(chunk_count: usize) -> Vec<usize> {
    let mut picked: Vec<usize> = (0..chunk_count).step_by(2).collect();
    if chunk_count > 0 && picked.last() != Some(&(chunk_count - 1)) {
        picked.push(chunk_count - 1);
    }
    picked
}

/// Prompt for the whole-document synthesis.
///
/// Injects the first and last [`EDGE_CHUNKS`] chunks plus an evenly
/// strided sample of the middle, keeping injected text under `cap`
/// characters.
pub fn summary_prompt(name: &str, chunks: &[CachedChunk], cap: usize) -> String {
    let n = chunks.len();
    let (head, middle, tail) = if n <= EDGE_CHUNKS * 2 {
        (chunks, &chunks[..0], &chunks[..0])
    } else {
        (
            &chunks[..EDGE_CHUNKS],
            &chunks[EDGE_CHUNKS..n - EDGE_CHUNKS],
            &chunks[n - EDGE_CHUNKS..],
        )
    };

    let mut budget = cap;
    let head_text: Vec<String> = head.iter().filter_map(|c| take_within(c, &mut budget)).collect();
    let tail_text: Vec<String> = tail.iter().filter_map(|c| take_within(c, &mut budget)).collect();

    let mut middle_text = Vec::new();
    if !middle.is_empty() && budget > 0 {
        let total: usize = middle.iter().map(|c| c.content.chars().count()).sum();
        let average = (total / middle.len()).max(1);
        let fits = (budget / average).max(1);
        let stride = middle.len().div_ceil(fits).max(1);
        middle_text = middle
            .iter()
            .step_by(stride)
            .filter_map(|c| take_within(c, &mut budget))
            .collect();
    }

    let mut prompt = format!(
        "Write a structured synthesis of the document \"{}\" ({} chunks).\n\
         Use these sections:\n\
         1. Topic\n\
         2. Key sections\n\
         3. Important facts and figures\n\
         4. Conclusions\n\n\
         --- Beginning ---\n{}\n",
        name,
        n,
        head_text.join("\n")
    );
    if !middle_text.is_empty() {
        prompt.push_str("\n--- Middle (sampled) ---\n");
        prompt.push_str(&middle_text.join("\n...\n"));
        prompt.push('\n');
    }
    if !tail_text.is_empty() {
        prompt.push_str("\n--- End ---\n");
        prompt.push_str(&tail_text.join("\n"));
        prompt.push('\n');
    }
    prompt
}

/// Deterministic level-2 summary used without a generator: a header and
/// the opening `max_chars` of the document, rebuilt from the chunks without
/// their overlap.
pub fn fallback_summary(
    name: &str,
    text_length: usize,
    chunks: &[CachedChunk],
    max_chars: usize,
) -> String {
    let mut opening = String::new();
    let mut remaining = max_chars;
    for chunk in chunks {
        if remaining == 0 {
            break;
        }
        let part: String = chunk
            .content
            .chars()
            .skip(chunk.overlap_chars)
            .take(remaining)
            .collect();
        remaining -= part.chars().count();
        opening.push_str(&part);
    }
    format!(
        "Document: {}\nLength: {} characters\nChunks: {}\n\n{}",
        name,
        text_length,
        chunks.len(),
        opening
    )
}

fn take_within(chunk: &CachedChunk, budget: &mut usize) -> Option<String> {
    if *budget == 0 {
        return None;
    }
    let text = take_chars(&chunk.content, *budget);
    *budget -= text.chars().count();
    Some(text)
}

fn take_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
