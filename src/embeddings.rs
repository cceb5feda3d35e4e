//! Known-user embeddings as consumed by the local matcher.
//!
//! The cache collaborator owns fetching, retries and persistence. This module
//! only defines the wire entry, the immutable snapshot the matcher reads, and
//! an in-process shared slot the collaborator publishes into.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::matcher::normalize;

/// One cached user as returned by the embeddings endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    pub name: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A known user with an L2-normalized embedding.
#[derive(Clone, Debug)]
pub struct KnownEmbedding {
    name: String,
    embedding: Vec<f32>,
}

impl KnownEmbedding {
    /// Returns `None` for entries without a usable embedding.
    pub fn new(name: impl Into<String>, embedding: &[f32]) -> Option<Self> {
        let embedding = normalize(embedding);
        if embedding.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            embedding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// Immutable view of the cache at one point in time.
#[derive(Clone, Debug, Default)]
pub struct EmbeddingSnapshot {
    entries: Arc<Vec<KnownEmbedding>>,
    loading: bool,
}

impl EmbeddingSnapshot {
    pub fn from_entries(entries: &[EmbeddingCacheEntry]) -> Self {
        let known: Vec<KnownEmbedding> = entries
            .iter()
            .filter_map(|entry| KnownEmbedding::new(entry.name.clone(), &entry.embedding))
            .collect();
        let skipped = entries.len() - known.len();
        if skipped > 0 {
            log::warn!("embeddings snapshot: skipped {} entries without embedding", skipped);
        }
        Self {
            entries: Arc::new(known),
            loading: false,
        }
    }

    /// Snapshot that signals "cache still loading, do not match".
    pub fn loading() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            loading: true,
        }
    }

    pub fn entries(&self) -> &[KnownEmbedding] {
        &self.entries
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Matching is only meaningful against a loaded, non-empty table.
    pub fn is_ready(&self) -> bool {
        !self.loading && !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of the current embeddings snapshot.
pub trait EmbeddingFeed: Send + Sync {
    fn snapshot(&self) -> EmbeddingSnapshot;
}

/// Shared slot written by the cache owner, read by the tracker.
#[derive(Clone, Debug)]
pub struct SharedEmbeddings {
    inner: Arc<RwLock<EmbeddingSnapshot>>,
}

impl SharedEmbeddings {
    /// Starts in the loading state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(EmbeddingSnapshot::loading())),
        }
    }

    pub fn publish(&self, entries: &[EmbeddingCacheEntry]) -> Result<()> {
        let snapshot = EmbeddingSnapshot::from_entries(entries);
        log::info!("embeddings cache: {} users loaded", snapshot.len());
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("embeddings lock poisoned"))?;
        *guard = snapshot;
        Ok(())
    }

    pub fn mark_loading(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("embeddings lock poisoned"))?;
        *guard = EmbeddingSnapshot::loading();
        Ok(())
    }
}

impl Default for SharedEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingFeed for SharedEmbeddings {
    fn snapshot(&self) -> EmbeddingSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            // A poisoned writer leaves no trustworthy table; report loading.
            Err(_) => EmbeddingSnapshot::loading(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingsFile {
    Wrapped { users: Vec<EmbeddingCacheEntry> },
    Bare(Vec<EmbeddingCacheEntry>),
}

/// Read a cached embeddings dump (`{"users": [...]}` or a bare array).
pub fn load_embeddings_file(path: &Path) -> Result<Vec<EmbeddingCacheEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read embeddings file {}: {}", path.display(), e))?;
    let parsed: EmbeddingsFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid embeddings file {}: {}", path.display(), e))?;
    Ok(match parsed {
        EmbeddingsFile::Wrapped { users } => users,
        EmbeddingsFile::Bare(users) => users,
    })
}
