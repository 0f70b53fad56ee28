//! Registry overview commands: `list`, `report`, `summarize`, `remove`.

use anyhow::Result;

use docrag_core::context::RequestContext;

use crate::blocking::BlockingEngine;

/// Print every registered document with its lifecycle state.
pub fn run_list(engine: &BlockingEngine) -> Result<()> {
    let names = engine.document_list();
    if names.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    let inner = engine.engine();
    println!("{:<48} {:>8}  STATE", "DOCUMENT", "CHUNKS");
    for name in &names {
        let chunks = inner.registry().chunks(name).map(|c| c.len()).unwrap_or(0);
        println!("{:<48} {:>8}  {}", name, chunks, inner.document_state(name));
    }
    println!();
    println!("{} document(s)", names.len());
    if !inner.retrieval_available() {
        println!("retrieval unavailable: embedding or store not configured");
    }
    Ok(())
}

/// Print the extraction confidence report.
pub fn run_report(engine: &BlockingEngine, json: bool) -> Result<()> {
    let report = engine.confidence_report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Extraction confidence");
    println!("  documents: {}", report.total_documents);
    println!("  average confidence: {:.2}", report.average_confidence);
    println!();
    for doc in &report.documents {
        println!(
            "  {:<40} {:>5.2}  {:<10} {:>8} chars  {} low-confidence word(s)",
            doc.name, doc.confidence, doc.file_type, doc.text_length, doc.low_confidence_words
        );
    }
    if !report.formatted_texts.is_empty() {
        println!();
        for text in &report.formatted_texts {
            println!("{}", text);
        }
    }
    Ok(())
}

/// Print the group summaries and whole-document summary of one document.
pub fn run_summarize(engine: &BlockingEngine, name: &str, stream: bool) -> Result<()> {
    let ctx = RequestContext::new().with_streaming(stream);
    let hierarchy = engine.summarize(&ctx, name)?;

    println!("--- Summary ({}) ---", if hierarchy.generated { "generated" } else { "extract" });
    println!("{}", hierarchy.summary);
    println!();
    println!("--- Groups ({}) ---", hierarchy.groups.len());
    for group in &hierarchy.groups {
        println!(
            "[group {}: chunks {}-{}]",
            group.summary_index, group.chunk_range.0, group.chunk_range.1
        );
        println!("{}", group.text);
        println!();
    }
    Ok(())
}

/// Remove a document; unknown names are reported, not treated as errors.
pub fn run_remove(engine: &BlockingEngine, name: &str) -> Result<()> {
    if engine.remove_document(name)? {
        println!("removed {}", name);
    } else {
        println!("not found: {}", name);
    }
    Ok(())
}
