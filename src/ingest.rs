//! `docrag ingest`: walk paths, extract each file and feed the engine.
//!
//! Directories are walked with the `[ingest]` include/exclude globs,
//! matched against paths relative to the directory. Files named directly
//! on the command line are always taken. A file whose format cannot be
//! read is still ingested with empty content so its document exists.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use docrag_core::chunk::Chunker;
use docrag_core::context::{ProgressEvent, RequestContext};
use docrag_core::models::IndexState;

use crate::blocking::BlockingEngine;
use crate::config::Config;
use crate::extract::{empty_extraction, extract_file, FormatKind};

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTarget {
    pub path: PathBuf,
    /// Document name: relative to the walked directory, or the bare file
    /// name for files passed directly. Names are unique within one run.
    pub name: String,
}

/// Expand `paths` into the sorted list of files to ingest.
pub fn collect_targets(config: &Config, paths: &[PathBuf]) -> Result<Vec<IngestTarget>> {
    let include_set = build_globset(&config.ingest.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut targets = Vec::new();
    for root in paths {
        if root.is_file() {
            targets.push(IngestTarget {
                path: root.clone(),
                name: file_name(root),
            });
            continue;
        }
        if !root.is_dir() {
            anyhow::bail!("Path does not exist: {}", root.display());
        }

        let walker = WalkDir::new(root).follow_links(config.ingest.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > config.ingest.max_file_bytes {
                warn!(file = %rel_str, size, "skipping file larger than ingest.max_file_bytes");
                continue;
            }

            targets.push(IngestTarget {
                path: path.to_path_buf(),
                name: rel_str,
            });
        }
    }

    // Sort for deterministic ordering
    targets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));

    // One document per name: the first path wins, later ones are reported.
    let mut unique: Vec<IngestTarget> = Vec::with_capacity(targets.len());
    for target in targets {
        match unique.last() {
            Some(kept) if kept.name == target.name => {
                if kept.path != target.path {
                    warn!(
                        name = %target.name,
                        kept = %kept.path.display(),
                        skipped = %target.path.display(),
                        "two files map to the same document name; skipping the second"
                    );
                }
            }
            _ => unique.push(target),
        }
    }
    Ok(unique)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Run `docrag ingest`.
pub fn run_ingest(
    engine: &BlockingEngine,
    config: &Config,
    paths: &[PathBuf],
    hierarchical: bool,
    dry_run: bool,
) -> Result<()> {
    let targets = collect_targets(config, paths)?;

    if dry_run {
        let chunker = Chunker::new(config.engine_settings().chunking);
        let mut total_chunks = 0;
        for target in &targets {
            let text = extract_file(&target.path).map(|e| e.text).unwrap_or_default();
            total_chunks += chunker.split(&target.name, &text).len();
        }
        println!("ingest (dry-run)");
        println!("  files found: {}", targets.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let ctx = RequestContext::new().with_progress(std::sync::Arc::new(|event: ProgressEvent| {
        if let ProgressEvent::Embedded { name, done, total } = event {
            tracing::debug!(document = %name, done, total, "embedding");
        }
    }));

    let mut documents = 0usize;
    let mut chunks = 0usize;
    let mut vectors = 0usize;
    let mut failed = 0usize;
    let mut partial = 0usize;
    let mut hierarchies = 0usize;

    for target in &targets {
        let extraction = match extract_file(&target.path) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(file = %target.name, "{}; ingesting empty content", e);
                let tag = FormatKind::from_path(&target.path)
                    .map(|k| k.tag())
                    .unwrap_or("unknown");
                empty_extraction(tag)
            }
        };

        let report = engine.ingest_extraction(&ctx, &target.name, extraction)?;
        documents += 1;
        chunks += report.chunks;
        vectors += report.vectors_persisted;
        failed += report.failed_chunks;
        if report.state == IndexState::PartiallyIndexed {
            partial += 1;
        }

        if hierarchical && report.state == IndexState::FullyIndexed {
            match engine.build_hierarchy(&ctx, &target.name) {
                Ok(h) => {
                    hierarchies += 1;
                    vectors += h.vectors_persisted;
                }
                Err(e) => warn!(file = %target.name, "hierarchy build failed: {:#}", e),
            }
        }
    }

    info!(documents, chunks, vectors, "ingest finished");

    println!("ingest");
    println!("  documents: {}", documents);
    println!("  chunks: {}", chunks);
    if engine.engine().retrieval_available() {
        println!("  vectors written: {}", vectors);
        println!("  chunks failed: {}", failed);
        println!("  partially indexed: {}", partial);
        if hierarchical {
            println!("  hierarchies built: {}", hierarchies);
        }
    } else {
        println!("  retrieval unavailable: documents listed only");
    }
    println!("ok");
    Ok(())
}
