//! Persistent per-provider model-list cache.
//!
//! Each provider's list lives in `<dir>/<provider>.json` as `{"models": [...], "timestamp": ...}`.
//! An entry is usable only while it is younger than the cache TTL. Reads and writes for the
//! same provider are serialized through a per-provider lock; different providers never block
//! each other.

use crate::error::Result;
use crate::llm::models::Model;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// How long a cached model list stays valid
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Cached model list of one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCacheEntry {
    #[serde(default)]
    pub models: Vec<Model>,
    /// When the list was fetched; `None` means never
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelCacheEntry {
    pub fn new(models: Vec<Model>) -> Self {
        Self {
            models,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn is_valid(&self, ttl: Duration) -> bool {
        self.is_valid_at(Utc::now(), ttl)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(timestamp) = self.timestamp else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(timestamp) < ttl,
            Err(_) => true,
        }
    }
}

/// File-backed store of [`ModelCacheEntry`] values keyed by provider name.
#[derive(Debug)]
pub struct ModelCache {
    dir: PathBuf,
    ttl: Duration,
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            locks: DashMap::new(),
        }
    }

    /// `<user cache dir>/polygate/models`, or under the temp dir when there is none
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("polygate")
            .join("models")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn path_for(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(provider)))
    }

    fn lock_for(&self, provider: &str) -> Arc<RwLock<()>> {
        self.locks.entry(provider.to_string()).or_insert_with(Default::default).clone()
    }

    /// Read the stored entry. A missing or unreadable file yields an empty, invalid entry.
    pub async fn load(&self, provider: &str) -> ModelCacheEntry {
        let lock = self.lock_for(provider);
        let _guard = lock.read().await;
        let path = self.path_for(provider);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return ModelCacheEntry::default(),
            Err(e) => {
                warn!(provider, path = %path.display(), error = %e, "Failed to read model cache");
                return ModelCacheEntry::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(provider, path = %path.display(), error = %e, "Ignoring corrupt model cache");
                ModelCacheEntry::default()
            }
        }
    }

    /// Models from a still-valid entry, if there is one
    pub async fn load_valid(&self, provider: &str) -> Option<Vec<Model>> {
        let entry = self.load(provider).await;
        if entry.is_valid(self.ttl) {
            debug!(provider, count = entry.models.len(), "Model cache hit");
            Some(entry.models)
        } else {
            None
        }
    }

    /// Store `models` stamped with the current time.
    pub async fn save(&self, provider: &str, models: &[Model]) -> Result<()> {
        let lock = self.lock_for(provider);
        let _guard = lock.write().await;

        tokio::fs::create_dir_all(&self.dir).await?;

        let entry = ModelCacheEntry::new(models.to_vec());
        let bytes = serde_json::to_vec_pretty(&entry)?;
        let path = self.path_for(provider);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(provider, count = models.len(), path = %path.display(), "Model cache saved");
        Ok(())
    }

    pub async fn invalidate(&self, provider: &str) -> Result<()> {
        let lock = self.lock_for(provider);
        let _guard = lock.write().await;

        match tokio::fs::remove_file(self.path_for(provider)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// File stem for a provider key. Percent-encoding keeps distinct keys in distinct files and
/// never produces a path separator.
fn file_stem(provider: &str) -> String {
    urlencoding::encode(provider).into_owned()
}
