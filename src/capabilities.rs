//! Capability resolution.
//!
//! Runs once at startup and turns the configuration into the
//! [`Capabilities`] the engine works with. Embedding providers and store
//! backends are tried in their configured order; the first one that
//! initializes wins. Failures are logged and the next candidate is tried.
//! If nothing initializes the capability stays absent and the engine runs
//! in degraded mode.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use docrag_core::embedding::Embedder;
use docrag_core::engine::Capabilities;
use docrag_core::store::memory::InMemoryStore;
use docrag_core::store::{DocumentStore, VectorStore};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Resolve every capability from `config`.
///
/// Never fails because a provider is unreachable; only an invalid
/// generation setup is reported as an error.
pub async fn resolve(config: &Config) -> Result<Capabilities> {
    let embedder = resolve_embedder(config);
    let generator = match create_generator(&config.generation) {
        Ok(generator) => generator,
        Err(e) => {
            warn!("generation unavailable: {:#}", e);
            None
        }
    };
    let (vector_store, document_store) = match resolve_store(config).await {
        Some((vectors, docs)) => (Some(vectors), Some(docs)),
        None => (None, None),
    };

    let caps = Capabilities {
        embedder,
        generator,
        vector_store,
        document_store,
    };
    info!(capabilities = ?caps, "capabilities resolved");
    Ok(caps)
}

/// First embedding provider that initializes, in configured order.
pub fn resolve_embedder(config: &Config) -> Option<Arc<dyn Embedder>> {
    for name in config.embedding.candidates() {
        if name == "disabled" {
            continue;
        }
        match create_embedder(&name, &config.embedding) {
            Ok(embedder) => {
                info!(provider = %name, model = embedder.model_name(), "embedding provider ready");
                return Some(embedder);
            }
            Err(e) => warn!(provider = %name, "embedding provider unavailable: {:#}", e),
        }
    }
    None
}

type StorePair = (Arc<dyn VectorStore>, Arc<dyn DocumentStore>);

async fn resolve_store(config: &Config) -> Option<StorePair> {
    for backend in &config.store.backends {
        match open_backend(backend, config).await {
            Ok(pair) => {
                info!(backend = %backend, "store backend ready");
                return Some(pair);
            }
            Err(e) => warn!(backend = %backend, "store backend unavailable: {:#}", e),
        }
    }
    None
}

async fn open_backend(backend: &str, config: &Config) -> Result<StorePair> {
    match backend {
        "sqlite" => {
            let pool = db::connect(config).await?;
            migrate::migrate_pool(&pool).await?;
            let store = Arc::new(SqliteStore::new(pool));
            Ok((store.clone(), store))
        }
        "memory" => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store))
        }
        other => bail!("Unknown store backend: {}", other),
    }
}
