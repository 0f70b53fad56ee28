//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/docrag.sqlite"
//!
//! [chunking]
//! chunk_size = 1500
//! overlap = 200
//!
//! [retrieval]
//! k = 2
//! max_context_length = 30000
//!
//! [embedding]
//! provider = "ollama"
//! fallback_providers = ["local"]
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.1"
//!
//! [store]
//! backends = ["sqlite", "memory"]
//! ```
//!
//! Every section except `[db]` is optional. [`load_config`] validates the
//! values once; the rest of the crate trusts them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docrag_core::chunk::{ChunkingParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use docrag_core::engine::EngineSettings;
use docrag_core::hierarchy::{
    HierarchyParams, DEFAULT_FALLBACK_CHARS, DEFAULT_GROUP_PREVIEW_CHARS, DEFAULT_GROUP_SIZE,
    DEFAULT_PROMPT_CHAR_CAP,
};
use docrag_core::ingest::DEFAULT_EMBED_BATCH_SIZE;
use docrag_core::retrieve::{
    RetrievalParams, DEFAULT_DETAIL_MIN_K, DEFAULT_FULL_CONTEXT_SAMPLES, DEFAULT_K,
    DEFAULT_MAX_CONTEXT_LENGTH,
};

/// Embedding provider names accepted in `[embedding]`.
pub const EMBEDDING_PROVIDERS: &[&str] = &["disabled", "openai", "ollama", "local"];
/// Generation provider names accepted in `[generation]`.
pub const GENERATION_PROVIDERS: &[&str] = &["disabled", "openai", "ollama"];
/// Store backend names accepted in `[store] backends`.
pub const STORE_BACKENDS: &[&str] = &["sqlite", "memory"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_detail_min_k")]
    pub detail_min_k: usize,
    #[serde(default = "default_full_context_samples")]
    pub full_context_samples: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
            detail_min_k: DEFAULT_DETAIL_MIN_K,
            full_context_samples: DEFAULT_FULL_CONTEXT_SAMPLES,
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}
fn default_max_context_length() -> usize {
    DEFAULT_MAX_CONTEXT_LENGTH
}
fn default_detail_min_k() -> usize {
    DEFAULT_DETAIL_MIN_K
}
fn default_full_context_samples() -> usize {
    DEFAULT_FULL_CONTEXT_SAMPLES
}

#[derive(Debug, Deserialize, Clone)]
pub struct HierarchyConfig {
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    #[serde(default = "default_group_preview_chars")]
    pub group_preview_chars: usize,
    #[serde(default = "default_prompt_char_cap")]
    pub prompt_char_cap: usize,
    #[serde(default = "default_fallback_chars")]
    pub fallback_chars: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            group_preview_chars: DEFAULT_GROUP_PREVIEW_CHARS,
            prompt_char_cap: DEFAULT_PROMPT_CHAR_CAP,
            fallback_chars: DEFAULT_FALLBACK_CHARS,
        }
    }
}

fn default_group_size() -> usize {
    DEFAULT_GROUP_SIZE
}
fn default_group_preview_chars() -> usize {
    DEFAULT_GROUP_PREVIEW_CHARS
}
fn default_prompt_char_cap() -> usize {
    DEFAULT_PROMPT_CHAR_CAP
}
fn default_fallback_chars() -> usize {
    DEFAULT_FALLBACK_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Tried in order when `provider` cannot be initialized.
    #[serde(default)]
    pub fallback_providers: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            fallback_providers: Vec::new(),
            model: None,
            dims: None,
            url: None,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Provider names in resolution order, without duplicates.
    pub fn candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in std::iter::once(&self.provider).chain(self.fallback_providers.iter()) {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL; defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    120
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Backends tried in order; the first that opens serves both the
    /// document and the vector store.
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
        }
    }
}

fn default_backends() -> Vec<String> {
    vec!["sqlite".to_string()]
}

/// Directory walking for `docrag ingest <dir>`.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Config {
    /// Engine tuning derived from the validated configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            chunking: ChunkingParams {
                chunk_size: self.chunking.chunk_size,
                overlap: self.chunking.overlap,
            },
            embed_batch_size: self.embedding.batch_size,
            hierarchy: HierarchyParams {
                group_size: self.hierarchy.group_size,
                group_preview_chars: self.hierarchy.group_preview_chars,
                prompt_char_cap: self.hierarchy.prompt_char_cap,
                fallback_chars: self.hierarchy.fallback_chars,
            },
            retrieval: RetrievalParams {
                detail_min_k: self.retrieval.detail_min_k,
                full_context_samples: self.retrieval.full_context_samples,
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.k == 0 {
        bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.max_context_length == 0 {
        bail!("retrieval.max_context_length must be > 0");
    }

    // Validate hierarchy
    if config.hierarchy.group_size == 0 {
        bail!("hierarchy.group_size must be > 0");
    }

    // Validate embedding
    for name in config.embedding.candidates() {
        if !EMBEDDING_PROVIDERS.contains(&name.as_str()) {
            bail!(
                "Unknown embedding provider: '{}'. Must be one of: {}",
                name,
                EMBEDDING_PROVIDERS.join(", ")
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate generation
    if !GENERATION_PROVIDERS.contains(&config.generation.provider.as_str()) {
        bail!(
            "Unknown generation provider: '{}'. Must be one of: {}",
            config.generation.provider,
            GENERATION_PROVIDERS.join(", ")
        );
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    // Validate store
    if config.store.backends.is_empty() {
        bail!("store.backends must list at least one backend");
    }
    for name in &config.store.backends {
        if !STORE_BACKENDS.contains(&name.as_str()) {
            bail!(
                "Unknown store backend: '{}'. Must be one of: {}",
                name,
                STORE_BACKENDS.join(", ")
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config("[db]\npath = \"./data/docrag.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1500);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.k, 2);
        assert_eq!(config.retrieval.max_context_length, 30_000);
        assert_eq!(config.hierarchy.group_size, 8);
        assert!(!config.embedding.is_enabled());
        assert!(!config.generation.is_enabled());
        assert_eq!(config.store.backends, vec!["sqlite"]);
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let err = parse_config("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\noverlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("magic"));

        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"disabled\"\nfallback_providers = [\"nope\"]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let err = parse_config("[db]\npath = \"x\"\n[store]\nbackends = [\"postgres\"]\n").unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn test_candidates_deduplicated() {
        let config = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 4\nfallback_providers = [\"local\", \"ollama\", \"disabled\"]\n",
        )
        .unwrap();
        assert_eq!(config.embedding.candidates(), vec!["ollama", "local", "disabled"]);
    }

    #[test]
    fn test_engine_settings() {
        let config = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_size = 800\noverlap = 100\n[embedding]\nbatch_size = 4\n",
        )
        .unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.chunking.chunk_size, 800);
        assert_eq!(settings.chunking.overlap, 100);
        assert_eq!(settings.embed_batch_size, 4);
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/docrag.example.toml")).unwrap();
        assert_eq!(config.embedding.candidates(), vec!["ollama", "local"]);
        assert_eq!(config.store.backends, vec!["sqlite", "memory"]);
        assert!(config.generation.is_enabled());
        assert!(!config.ingest.follow_symlinks);
    }
}
