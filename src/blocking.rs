//! Synchronous adapter over [`DocumentEngine`].
//!
//! The engine is async throughout. [`BlockingEngine`] is the one place
//! where synchronous callers enter it: it owns a multi-thread tokio runtime
//! built once and blocks the calling thread on each engine future.
//!
//! Must not be used from inside an async task. Calls made while a tokio
//! runtime is active on the current thread return an error instead of
//! nesting a second executor.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::runtime::{Handle, Runtime};

use docrag_core::context::RequestContext;
use docrag_core::engine::{ConfidenceReport, DocumentEngine};
use docrag_core::hierarchy::{DocumentHierarchy, HierarchyReport};
use docrag_core::ingest::IngestReport;
use docrag_core::models::Extraction;
use docrag_core::retrieve::{ContextRequest, QueryHit, SearchStrategy};

use crate::capabilities;
use crate::config::Config;

fn ensure_outside_runtime() -> Result<()> {
    if Handle::try_current().is_ok() {
        bail!("BlockingEngine called from inside an async runtime; await the engine directly");
    }
    Ok(())
}

pub struct BlockingEngine {
    runtime: Runtime,
    engine: Arc<DocumentEngine>,
}

impl BlockingEngine {
    /// Wrap an already constructed engine.
    pub fn new(engine: DocumentEngine) -> Result<Self> {
        ensure_outside_runtime()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            engine: Arc::new(engine),
        })
    }

    /// Resolve capabilities from `config`, build the engine and restore the
    /// registry from the document store.
    pub fn open(config: &Config) -> Result<Self> {
        ensure_outside_runtime()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let engine = runtime.block_on(async {
            let caps = capabilities::resolve(config).await?;
            let engine = DocumentEngine::new(caps, config.engine_settings());
            engine.restore().await?;
            anyhow::Ok(engine)
        })?;
        Ok(Self {
            runtime,
            engine: Arc::new(engine),
        })
    }

    /// Shared handle for async callers.
    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }

    fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        ensure_outside_runtime()?;
        Ok(self.runtime.block_on(fut))
    }

    pub fn document_list(&self) -> Vec<String> {
        self.engine.document_list()
    }

    pub fn confidence_report(&self) -> ConfidenceReport {
        self.engine.confidence_report()
    }

    pub fn ingest_text(&self, ctx: &RequestContext, name: &str, text: &str) -> Result<IngestReport> {
        Ok(self.run(self.engine.ingest_text(ctx, name, text))??)
    }

    pub fn ingest_extraction(
        &self,
        ctx: &RequestContext,
        name: &str,
        extraction: Extraction,
    ) -> Result<IngestReport> {
        Ok(self.run(self.engine.ingest_extraction(ctx, name, extraction))??)
    }

    pub fn build_hierarchy(&self, ctx: &RequestContext, name: &str) -> Result<HierarchyReport> {
        Ok(self.run(self.engine.build_hierarchy(ctx, name))??)
    }

    pub fn summarize(&self, ctx: &RequestContext, name: &str) -> Result<DocumentHierarchy> {
        Ok(self.run(self.engine.summarize(ctx, name))??)
    }

    pub fn document_context(
        &self,
        ctx: &RequestContext,
        query: &str,
        request: &ContextRequest,
    ) -> Result<Option<String>> {
        Ok(self.run(self.engine.document_context(ctx, query, request))??)
    }

    pub fn query_documents(&self, ctx: &RequestContext, query: &str, k: usize) -> Result<Vec<QueryHit>> {
        Ok(self.run(self.engine.query_documents(ctx, query, k))??)
    }

    pub fn smart_search(
        &self,
        ctx: &RequestContext,
        query: &str,
        k: usize,
        strategy: Option<SearchStrategy>,
    ) -> Result<Vec<QueryHit>> {
        Ok(self.run(self.engine.smart_search(ctx, query, k, strategy))??)
    }

    pub fn remove_document(&self, name: &str) -> Result<bool> {
        Ok(self.run(self.engine.remove_document(name))??)
    }
}
