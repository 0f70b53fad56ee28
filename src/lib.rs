//! # docrag
//!
//! Native backends and command-line front end for the document RAG engine
//! in `docrag-core`.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`capabilities`] | Startup resolution of embedder, generator and stores |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] | `VectorStore` + `DocumentStore` over SQLite |
//! | [`embedding`] | OpenAI, Ollama and local fastembed embedders |
//! | [`generation`] | OpenAI and Ollama text generators |
//! | [`extract`] | Per-format text extraction |
//! | [`blocking`] | Synchronous adapter over the async engine |
//! | [`ingest`] / [`search`] / [`stats`] | CLI command implementations |
//! | [`logging`] | Tracing subscriber setup |

pub mod blocking;
pub mod capabilities;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
