//! Cache layer
//!
//! Read-through / write-invalidate cache in front of provider list and get
//! calls. The layer is fail-open: a missing or failing backend degrades every
//! read into a miss and every write into a no-op, logged as a warning.
//!
//! # Module Structure
//!
//! - [`key`] - deterministic, namespaced cache keys
//! - [`memory`] - in-process backend with passive TTL expiry

pub mod key;
pub mod memory;

pub use key::{CacheKey, KeyGranularity};
pub use memory::MemoryCache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default lifetime of cached entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Cache backend collaborator: atomic get/set/delete per key with TTL
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Typed cache facade used by the dispatcher
#[derive(Clone)]
pub struct ResourceCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl ResourceCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
        }
    }

    /// Pass-through layer: every read misses, every write is dropped
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_list<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<Vec<T>> {
        self.read(key).await
    }

    pub async fn set_list<T: Serialize + Sync>(&self, key: &CacheKey, items: &[T]) {
        self.write(key, items).await
    }

    pub async fn get_item<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.read(key).await
    }

    pub async fn set_item<T: Serialize + Sync>(&self, key: &CacheKey, item: &T) {
        self.write(key, item).await
    }

    /// Remove one entry; failures are logged and swallowed
    pub async fn invalidate(&self, key: &CacheKey) {
        let Some(backend) = &self.backend else {
            return;
        };

        let key_str = key.to_string();
        match backend.delete(&key_str).await {
            Ok(()) => tracing::debug!("cache invalidated: {}", key_str),
            Err(e) => tracing::warn!("Failed to invalidate cache key {}: {}", key_str, e),
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let key_str = key.to_string();

        let bytes = match backend.get(&key_str).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("cache miss: {}", key_str);
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}, treating as miss: {}", key_str, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::debug!("cache hit: {}", key_str);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key_str, e);
                None
            }
        }
    }

    async fn write<T: Serialize + Sync + ?Sized>(&self, key: &CacheKey, value: &T) {
        let Some(backend) = &self.backend else {
            return;
        };
        let key_str = key.to_string();

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to encode cache entry {}: {}", key_str, e);
                return;
            }
        };

        if let Err(e) = backend.set(&key_str, bytes, self.ttl).await {
            tracing::warn!("Failed to write cache entry {}: {}", key_str, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkInfo;
    use crate::resource::{Provider, ResourceKind};
    use uuid::Uuid;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    fn list_key() -> CacheKey {
        CacheKey::list(ResourceKind::Vpc, Provider::Aws, Uuid::nil(), "us-east-1")
    }

    #[tokio::test]
    async fn test_list_round_trip_and_invalidate() {
        let cache = ResourceCache::new(Arc::new(MemoryCache::new()), DEFAULT_TTL);
        let items = vec![NetworkInfo::new("vpc-1", "one")];

        cache.set_list(&list_key(), &items).await;
        let cached: Vec<NetworkInfo> = cache.get_list(&list_key()).await.unwrap();
        assert_eq!(cached, items);

        cache.invalidate(&list_key()).await;
        assert!(cache.get_list::<NetworkInfo>(&list_key()).await.is_none());
    }

    #[tokio::test]
    async fn test_failing_backend_is_a_miss() {
        let cache = ResourceCache::new(Arc::new(BrokenBackend), DEFAULT_TTL);
        cache
            .set_list(&list_key(), &[NetworkInfo::new("vpc-1", "one")])
            .await;
        assert!(cache.get_list::<NetworkInfo>(&list_key()).await.is_none());
        cache.invalidate(&list_key()).await;
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = ResourceCache::disabled();
        cache
            .set_item(&list_key(), &NetworkInfo::new("vpc-1", "one"))
            .await;
        assert!(!cache.is_enabled());
        assert!(cache.get_item::<NetworkInfo>(&list_key()).await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = Arc::new(MemoryCache::new());
        backend
            .set(&list_key().to_string(), b"not json".to_vec(), DEFAULT_TTL)
            .await
            .unwrap();
        let cache = ResourceCache::new(backend, DEFAULT_TTL);
        assert!(cache.get_list::<NetworkInfo>(&list_key()).await.is_none());
    }
}
