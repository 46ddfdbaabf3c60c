//! Cache-before-fetch integration for transcript and suggestion lookups
//!
//! The network collaborators are out of scope; they are handed in as futures
//! and only run on a cache miss.

use crate::cache::{store::BoundedCache, types::CacheKey, types::CacheStats};
use crate::config::AppConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Key for a fetched transcript or suggestion list
///
/// Renders as `{video_id}-{lang_code}-{flag}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptKey {
    pub video_id: String,
    pub lang_code: String,
    pub flag: bool,
}

impl TranscriptKey {
    pub fn new(video_id: impl Into<String>, lang_code: impl Into<String>, flag: bool) -> Self {
        Self {
            video_id: video_id.into(),
            lang_code: lang_code.into(),
            flag,
        }
    }

    pub fn to_cache_key(&self) -> CacheKey {
        self.to_string()
    }
}

impl fmt::Display for TranscriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.video_id, self.lang_code, self.flag)
    }
}

/// Shared LRU cache consulted before issuing an external fetch
pub struct FetchCache<V> {
    name: &'static str,
    inner: Arc<Mutex<BoundedCache<CacheKey, V>>>,
}

impl<V> Clone for FetchCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> FetchCache<V> {
    /// Create a named cache (the name only appears in logs)
    pub fn new(name: &'static str, capacity: usize) -> Result<Self> {
        Ok(Self {
            name,
            inner: Arc::new(Mutex::new(BoundedCache::new(capacity)?)),
        })
    }

    pub async fn has(&self, key: &TranscriptKey) -> bool {
        self.inner.lock().await.has(key.to_cache_key().as_str())
    }

    pub async fn get(&self, key: &TranscriptKey) -> Option<V> {
        self.inner.lock().await.get(key.to_cache_key().as_str()).cloned()
    }

    pub async fn put(&self, key: &TranscriptKey, value: V) {
        let mut cache = self.inner.lock().await;
        if let Some((evicted, _)) = cache.put(key.to_cache_key(), value) {
            debug!("{} cache evicted {}", self.name, evicted);
        }
    }

    /// Return the cached value, or run `fetch` and cache its result
    ///
    /// The lock is not held while `fetch` runs. A failed fetch caches nothing
    /// and its error is returned unchanged.
    pub async fn get_or_fetch<F, Fut>(&self, key: &TranscriptKey, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.get(key).await {
            debug!("{} cache hit: {}", self.name, key);
            return Ok(hit);
        }

        debug!("{} cache miss, fetching: {}", self.name, key);
        let value = fetch().await?;
        self.put(key, value.clone()).await;
        Ok(value)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }

    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.capacity()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

/// The transcript and suggestion caches of one page, sized from config
pub struct FetchCaches<T, S> {
    pub transcripts: FetchCache<T>,
    pub suggestions: FetchCache<S>,
}

impl<T: Clone, S: Clone> FetchCaches<T, S> {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transcripts: FetchCache::new("transcripts", config.transcript_cache_capacity)?,
            suggestions: FetchCache::new("suggestions", config.suggestion_cache_capacity)?,
        })
    }
}
