//! `docrag context`, `docrag query` and `docrag search`.

use anyhow::Result;

use docrag_core::context::RequestContext;
use docrag_core::retrieve::{ContextRequest, QueryHit, SearchStrategy};

use crate::blocking::BlockingEngine;
use crate::config::Config;

/// Print the context block the engine would hand to a language model.
pub fn run_context(
    engine: &BlockingEngine,
    config: &Config,
    query: &str,
    include_all_chunks: Option<bool>,
    max_context_length: Option<usize>,
) -> Result<()> {
    let request = ContextRequest {
        k: config.retrieval.k,
        include_all_chunks,
        max_context_length: max_context_length.unwrap_or(config.retrieval.max_context_length),
    };

    match engine.document_context(&RequestContext::new(), query, &request)? {
        Some(context) => println!("{}", context),
        None => println!("No context."),
    }
    Ok(())
}

/// Raw similarity query over every level.
pub fn run_query(engine: &BlockingEngine, query: &str, k: usize, json: bool) -> Result<()> {
    let hits = engine.query_documents(&RequestContext::new(), query, k)?;
    print_hits(&hits, json)
}

/// Strategy-aware search; the strategy is inferred when not given.
pub fn run_search(
    engine: &BlockingEngine,
    query: &str,
    k: usize,
    strategy: Option<SearchStrategy>,
    json: bool,
) -> Result<()> {
    let hits = engine.smart_search(&RequestContext::new(), query, k, strategy)?;
    print_hits(&hits, json)
}

fn print_hits(hits: &[QueryHit], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {}, level {})",
            i + 1,
            hit.similarity,
            hit.source,
            hit.chunk,
            hit.level.as_u8()
        );
        println!(
            "    excerpt: \"{}\"",
            excerpt(&hit.content, 240).replace('\n', " ").trim()
        );
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
