//! # docrag CLI
//!
//! Ingests documents, builds hierarchical indexes and answers queries with
//! the adaptive retriever.
//!
//! ## Usage
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag init` | Create the SQLite database and run schema migrations |
//! | `docrag ingest <paths>...` | Extract, chunk, embed and persist files |
//! | `docrag hierarchy <name>` | Build group and document summary vectors |
//! | `docrag list` | List registered documents and their state |
//! | `docrag remove <name>` | Remove a document and its vectors |
//! | `docrag context "<query>"` | Print the context block for a question |
//! | `docrag query "<query>"` | Raw similarity search |
//! | `docrag search "<query>"` | Strategy-aware search |
//! | `docrag summarize <name>` | Print a document's summaries |
//! | `docrag report` | Extraction confidence report |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docrag::blocking::BlockingEngine;
use docrag::{config, ingest, logging, migrate, search, stats};
use docrag_core::context::RequestContext;
use docrag_core::retrieve::SearchStrategy;

/// docrag: document retrieval-augmented generation engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "docrag",
    about = "Document RAG indexing and adaptive query engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked using the `[ingest]` globs. Re-ingesting a
    /// name replaces its chunks and vectors.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Build the hierarchical index for each fully indexed document.
        #[arg(long)]
        hierarchical: bool,

        /// Show file and chunk counts without ingesting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Build the hierarchical index of one document.
    Hierarchy {
        name: String,

        /// Stream generation from the backend.
        #[arg(long)]
        stream: bool,
    },

    /// List registered documents.
    List,

    /// Remove a document with its vectors.
    Remove { name: String },

    /// Print the context block for a question.
    Context {
        query: String,

        /// Force whole-document context.
        #[arg(long, conflicts_with = "detail")]
        all_chunks: bool,

        /// Force similarity-ranked detail context.
        #[arg(long)]
        detail: bool,

        /// Character budget (defaults to retrieval.max_context_length).
        #[arg(long)]
        max_len: Option<usize>,
    },

    /// Similarity search over every vector level.
    Query {
        query: String,

        /// Number of results (defaults to retrieval.k).
        #[arg(long)]
        k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Search with a summary or detailed strategy.
    Search {
        query: String,

        #[arg(long)]
        k: Option<usize>,

        /// `summary` or `detailed`; inferred from the query when omitted.
        #[arg(long)]
        strategy: Option<SearchStrategy>,

        #[arg(long)]
        json: bool,
    },

    /// Print group and document summaries.
    Summarize {
        name: String,

        #[arg(long)]
        stream: bool,
    },

    /// Extraction confidence report.
    Report {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(migrate::run_migrations(&cfg))?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = BlockingEngine::open(&cfg)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Ingest {
            paths,
            hierarchical,
            dry_run,
        } => {
            ingest::run_ingest(&engine, &cfg, &paths, hierarchical, dry_run)?;
        }
        Commands::Hierarchy { name, stream } => {
            let ctx = RequestContext::new().with_streaming(stream);
            let report = engine.build_hierarchy(&ctx, &name)?;
            println!("hierarchy {}", report.name);
            println!("  groups: {}", report.groups);
            println!("  level-0 vectors: {}", report.level0_indexed);
            println!("  vectors written: {}", report.vectors_persisted);
            if report.vectors_failed > 0 {
                println!("  vectors failed: {}", report.vectors_failed);
            }
            println!(
                "  summary: {}",
                if report.generated { "generated" } else { "extract" }
            );
            println!("ok");
        }
        Commands::List => stats::run_list(&engine)?,
        Commands::Remove { name } => stats::run_remove(&engine, &name)?,
        Commands::Context {
            query,
            all_chunks,
            detail,
            max_len,
        } => {
            let include_all_chunks = match (all_chunks, detail) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            search::run_context(&engine, &cfg, &query, include_all_chunks, max_len)?;
        }
        Commands::Query { query, k, json } => {
            search::run_query(&engine, &query, k.unwrap_or(cfg.retrieval.k), json)?;
        }
        Commands::Search {
            query,
            k,
            strategy,
            json,
        } => {
            search::run_search(&engine, &query, k.unwrap_or(cfg.retrieval.k), strategy, json)?;
        }
        Commands::Summarize { name, stream } => stats::run_summarize(&engine, &name, stream)?,
        Commands::Report { json } => stats::run_report(&engine, json)?,
    }

    Ok(())
}
