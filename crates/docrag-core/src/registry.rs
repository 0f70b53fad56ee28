//! In-process document registry and chunk cache.
//!
//! Maps a document name to its store id, ordered chunk list, confidence
//! record, binary assets and lifecycle state. Queries read snapshots;
//! ingestion and removal are the only writers and serialize per name
//! through [`DocumentRegistry::writer`].
//!
//! The `RwLock`s here guard plain map operations and are never held across
//! an `.await`. The per-name writer lock is async and is.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{EngineError, Result};
use crate::models::{AssetRef, CachedChunk, ConfidenceRecord, IndexState};

/// Everything the engine knows about one document.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub document_id: String,
    /// Ordered by `chunk_index`, ascending.
    pub chunks: Arc<Vec<CachedChunk>>,
    pub confidence: Option<ConfidenceRecord>,
    pub assets: Arc<Vec<AssetRef>>,
    pub state: IndexState,
}

#[derive(Default)]
struct Maps {
    by_name: BTreeMap<String, RegistryEntry>,
    name_by_id: HashMap<String, String>,
}

/// Name-keyed document cache shared by the ingestion and query paths.
#[derive(Default)]
pub struct DocumentRegistry {
    maps: RwLock<Maps>,
    writers: Mutex<HashMap<String, Arc<futures::lock::Mutex<()>>>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The async lock that serializes writers for `name`.
    pub fn writer(&self, name: &str) -> Arc<futures::lock::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(futures::lock::Mutex::new(())))
            .clone()
    }

    /// Registered names in ascending order.
    pub fn names(&self) -> Vec<String> {
        self.read().by_name.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_name.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<RegistryEntry> {
        self.read().by_name.get(name).cloned()
    }

    pub fn document_id(&self, name: &str) -> Option<String> {
        self.read().by_name.get(name).map(|e| e.document_id.clone())
    }

    pub fn name_for_id(&self, document_id: &str) -> Option<String> {
        self.read().name_by_id.get(document_id).cloned()
    }

    pub fn chunks(&self, name: &str) -> Option<Arc<Vec<CachedChunk>>> {
        self.read().by_name.get(name).map(|e| e.chunks.clone())
    }

    pub fn state(&self, name: &str) -> IndexState {
        self.read()
            .by_name
            .get(name)
            .map(|e| e.state)
            .unwrap_or(IndexState::Unindexed)
    }

    /// All entries, ordered by name.
    pub fn snapshot(&self) -> Vec<(String, RegistryEntry)> {
        self.read()
            .by_name
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert or replace the entry for `name`.
    ///
    /// Replacement drops the previous chunk list entirely; re-ingestion
    /// never appends to stale chunks.
    pub fn commit(&self, name: &str, mut entry: RegistryEntry) {
        entry.chunks = Arc::new(sorted(entry.chunks));
        let mut maps = self.write();
        if let Some(previous) = maps.by_name.get(name) {
            if previous.document_id != entry.document_id {
                let stale = previous.document_id.clone();
                maps.name_by_id.remove(&stale);
            }
        }
        maps.name_by_id
            .insert(entry.document_id.clone(), name.to_string());
        maps.by_name.insert(name.to_string(), entry);
    }

    /// Move `name` to `next`, validating the lifecycle.
    pub fn transition(&self, name: &str, next: IndexState) -> Result<()> {
        let mut maps = self.write();
        let entry = maps
            .by_name
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        if entry.state != next && !entry.state.can_transition_to(next) {
            return Err(EngineError::InvalidState {
                name: name.to_string(),
                state: entry.state,
                action: "change state",
            });
        }
        entry.state = next;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<RegistryEntry> {
        let mut maps = self.write();
        let entry = maps.by_name.remove(name)?;
        maps.name_by_id.remove(&entry.document_id);
        Some(entry)
    }
}

fn sorted(chunks: Arc<Vec<CachedChunk>>) -> Vec<CachedChunk> {
    let mut chunks = Arc::try_unwrap(chunks).unwrap_or_else(|shared| (*shared).clone());
    chunks.sort_by_key(|c| c.chunk_index);
    chunks
}
