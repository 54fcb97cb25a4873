//! Content-addressed cache of AI completions
//!
//! Entries are keyed by a fingerprint of provider, output language and the
//! request text chosen by the caller. Payloads are stored base64 encoded. The cache never
//! fails a caller:
//! - an undecodable entry is treated as a miss
//! - a failed write is logged and dropped
//! - a disabled cache misses every lookup and ignores every store

mod store;

pub use store::{CacheStore, FileStore, MemoryStore};

use crate::observability::RemedyMetrics;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Compute the cache key for a completion request
pub fn fingerprint(provider: &str, language: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(language.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Which store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

/// Cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Directory for the file backend
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from("/var/cache/kube-remedy")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backend: CacheBackend::default(),
            dir: default_dir(),
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> CompletionCache {
        let store: Arc<dyn CacheStore> = match self.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::File => Arc::new(FileStore::new(&self.dir)),
        };
        let cache = CompletionCache::new(store);
        cache.set_disabled(!self.enabled);
        cache
    }
}

/// Completion cache shared by every remediation of the process
pub struct CompletionCache {
    store: Arc<dyn CacheStore>,
    disabled: AtomicBool,
    metrics: RemedyMetrics,
}

impl CompletionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            disabled: AtomicBool::new(false),
            metrics: RemedyMetrics::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Takes effect for the next lookup; in-flight work is not interrupted
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub async fn lookup(&self, fingerprint: &str) -> Option<String> {
        if self.disabled() {
            return None;
        }

        let encoded = match self.store.load(fingerprint).await {
            Ok(Some(encoded)) => encoded,
            Ok(None) => {
                self.metrics.inc_cache_misses();
                return None;
            }
            Err(e) => {
                warn!(%fingerprint, error = %e, "Cache read failed, treating as miss");
                self.metrics.inc_cache_misses();
                return None;
            }
        };

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));

        match decoded {
            Ok(response) => {
                debug!(%fingerprint, "Cache hit");
                self.metrics.inc_cache_hits();
                Some(response)
            }
            Err(e) => {
                warn!(%fingerprint, error = %e, "Cached entry is not decodable, regenerating");
                self.metrics.inc_cache_misses();
                None
            }
        }
    }

    /// Returns true if the entry was written
    pub async fn store(&self, fingerprint: &str, response: &str) -> bool {
        if self.disabled() {
            return false;
        }

        match self.store.save(fingerprint, &STANDARD.encode(response)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%fingerprint, error = %e, "Cache write failed");
                self.metrics.inc_cache_store_errors();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }

        async fn save(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }
    }

    #[test]
    fn test_fingerprint_depends_on_every_input() {
        let base = fingerprint("openai", "english", "fix it");
        assert_eq!(base, fingerprint("openai", "english", "fix it"));
        assert_ne!(base, fingerprint("anthropic", "english", "fix it"));
        assert_ne!(base, fingerprint("openai", "german", "fix it"));
        assert_ne!(base, fingerprint("openai", "english", "fix it!"));
        // the separator keeps field boundaries distinct
        assert_ne!(fingerprint("ab", "c", "x"), fingerprint("a", "bc", "x"));
        assert_eq!(base.len(), 64);
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = CompletionCache::in_memory();
        let key = fingerprint("openai", "english", "prompt");

        assert!(cache.lookup(&key).await.is_none());
        assert!(cache.store(&key, "apiVersion: v1\n").await);
        assert_eq!(cache.lookup(&key).await.as_deref(), Some("apiVersion: v1\n"));
    }

    #[tokio::test]
    async fn test_disabled_cache_misses_and_ignores_writes() {
        let store = Arc::new(MemoryStore::new());
        let cache = CompletionCache::new(store.clone());
        let key = fingerprint("openai", "english", "prompt");
        cache.store(&key, "cached").await;

        cache.set_disabled(true);
        assert!(cache.lookup(&key).await.is_none());
        assert!(!cache.store(&key, "other").await);

        cache.set_disabled(false);
        assert_eq!(cache.lookup(&key).await.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store.save("abc", "%%% not base64 %%%").await.unwrap();

        let cache = CompletionCache::new(store);
        assert!(cache.lookup("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let cache = CompletionCache::new(Arc::new(BrokenStore));
        assert!(!cache.store("abc", "value").await);
        assert!(cache.lookup("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_config_builds_disabled_cache() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(config.build().disabled());
    }
}
