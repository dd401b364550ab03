//! Shared result cache for pipeline outputs.
//!
//! Entries are keyed by a fingerprint of the app, locale, pipeline, model
//! version and corpus content. The backing store is pluggable; an in-memory
//! map and a directory of JSON files are provided.

use crate::models::{PipelineKind, PipelinePayload, ReviewCorpus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

/// A cached pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: PipelinePayload,
    /// Tokens originally spent producing the payload.
    pub token_cost: u64,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backing storage for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;
    async fn save(&self, entry: CacheEntry) -> Result<()>;
    async fn remove(&self, fingerprint: &str) -> Result<()>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(fingerprint).cloned())
    }

    async fn save(&self, entry: CacheEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<()> {
        self.entries.write().await.remove(fingerprint);
        Ok(())
    }
}

/// One JSON file per fingerprint, so results outlive the process.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(fingerprint);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        };

        let entry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache entry: {}", path.display()))?;
        Ok(Some(entry))
    }

    async fn save(&self, entry: CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;

        let path = self.path_for(&entry.fingerprint);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec(&entry)?;
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to commit cache entry: {}", path.display()))?;
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Deterministic cache key for one pipeline over one corpus.
pub fn fingerprint(corpus: &ReviewCorpus, kind: PipelineKind, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        corpus.app_id(),
        corpus.locale(),
        kind.as_str(),
        model_version,
        corpus.content_hash(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// TTL-aware cache shared by every job in the process.
///
/// Store failures are logged and treated as misses; a broken cache never
/// fails a pipeline.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Live entry for the fingerprint, if any. Expired entries are evicted.
    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = match self.store.load(fingerprint).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(fingerprint, "Cache read failed: {:#}", e);
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            debug!(fingerprint, "Cache entry expired");
            if let Err(e) = self.store.remove(fingerprint).await {
                warn!(fingerprint, "Failed to evict expired entry: {:#}", e);
            }
            return None;
        }

        Some(entry)
    }

    /// Store a payload for `ttl`. Last write wins.
    pub async fn put(
        &self,
        fingerprint: &str,
        payload: PipelinePayload,
        token_cost: u64,
        ttl: Duration,
    ) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            payload,
            token_cost,
            expires_at: Utc::now() + ttl,
        };

        if let Err(e) = self.store.save(entry).await {
            warn!(fingerprint, "Cache write failed: {:#}", e);
        }
    }

    /// Serialize work on one fingerprint within this process.
    ///
    /// Holding the guard across check, compute and put keeps concurrent jobs
    /// from paying twice for the same result.
    pub async fn lock(&self, fingerprint: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.retain(|_, slot| Arc::strong_count(slot) > 1);
            in_flight
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}
