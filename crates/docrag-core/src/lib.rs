//! # docrag core
//!
//! Runtime-agnostic document RAG engine: data models, chunking, the
//! document registry, ingestion, hierarchical summarization and adaptive
//! retrieval, written against capability traits ([`embedding::Embedder`],
//! [`generation::Generator`], [`store::VectorStore`],
//! [`store::DocumentStore`]).
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Concrete backends live in the `docrag` crate.
//!
//! ```rust
//! use docrag_core::engine::{Capabilities, DocumentEngine, EngineSettings};
//!
//! let engine = DocumentEngine::new(Capabilities::default(), EngineSettings::default());
//! assert!(engine.document_list().is_empty());
//! assert!(!engine.retrieval_available());
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod hierarchy;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod retrieve;
pub mod store;
