use moka::future::Cache;
use moka::Expiry;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::GatewayError;
use crate::kv::{KvError, KvStore};

/// Longest TTL an entry may live in L1. L2-originated entries are capped to
/// this even when the logical TTL (e.g. a did:key resolution) is much longer.
const L1_MAX_TTL: Duration = Duration::from_secs(3600);

const L1_CAPACITY: u64 = 10_000;

#[derive(Clone)]
struct CacheEntry {
    value: Arc<Vec<u8>>,
    expires_at: Instant,
}

struct PerEntryExpiry;

impl Expiry<String, CacheEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(Instant::now()))
    }
}

/// Two-layer byte cache: in-process moka L1 in front of the shared KV (L2).
///
/// Reads fall through L1 → L2; an L2 hit repopulates L1 with a capped TTL.
/// Writes go through to both layers with the same TTL; deletes remove from
/// both. Keyspace is partitioned by prefix (`did:`, `rev:`, `policy:`).
pub struct LayeredCache {
    l1: Cache<String, CacheEntry>,
    l2: Arc<dyn KvStore>,
}

impl LayeredCache {
    pub fn new(l2: Arc<dyn KvStore>) -> Self {
        let l1 = Cache::builder()
            .max_capacity(L1_CAPACITY)
            .expire_after(PerEntryExpiry)
            .build();
        Self { l1, l2 }
    }

    fn l1_entry(value: &[u8], ttl: Duration) -> CacheEntry {
        CacheEntry {
            value: Arc::new(value.to_vec()),
            expires_at: Instant::now() + ttl.min(L1_MAX_TTL),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(entry) = self.l1.get(key).await {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.as_ref().clone()));
            }
        }
        match self.l2.get(key).await? {
            Some(value) => {
                // L2 does not report remaining TTL; re-admit to L1 for the
                // capped duration only.
                self.l1
                    .insert(key.to_string(), Self::l1_entry(&value, L1_MAX_TTL))
                    .await;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        self.l1
            .insert(key.to_string(), Self::l1_entry(value, ttl))
            .await;
        self.l2.set_with_ttl(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.l1.invalidate(key).await;
        self.l2.del(key).await
    }

    /// Drop the L1 entry only. Admin mutations use this after invalidating
    /// L2 through [`LayeredCache::delete`] on the writing instance; other
    /// replicas converge by L1 TTL.
    pub async fn evict_local(&self, key: &str) {
        self.l1.invalidate(key).await;
    }

    /// Read-through load. The loader runs on every concurrent miss; callers
    /// are read-only resolvers that tolerate redundant loads, so misses are
    /// deliberately not serialized. KV read/write failures degrade to the
    /// loader rather than failing the request.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Vec<u8>, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, GatewayError>>,
    {
        match self.get(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "cache read failed, falling to loader"),
        }

        let value = loader().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            tracing::warn!(key, error = %e, "cache write-through failed");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn layered() -> (LayeredCache, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        (LayeredCache::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn write_through_populates_both_layers() {
        let (cache, kv) = layered();
        cache.set("did:x", b"key", Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.get("did:x").await.unwrap(), Some(b"key".to_vec()));
        assert_eq!(cache.get("did:x").await.unwrap(), Some(b"key".to_vec()));
    }

    #[tokio::test]
    async fn l2_hit_survives_l1_eviction() {
        let (cache, _kv) = layered();
        cache.set("did:y", b"key", Duration::from_secs(60)).await.unwrap();
        cache.evict_local("did:y").await;
        assert_eq!(cache.get("did:y").await.unwrap(), Some(b"key".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_both_layers() {
        let (cache, kv) = layered();
        cache.set("rev:a", b"[]", Duration::from_secs(60)).await.unwrap();
        cache.delete("rev:a").await.unwrap();
        assert_eq!(cache.get("rev:a").await.unwrap(), None);
        assert_eq!(kv.get("rev:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_load_runs_loader_once_per_miss() {
        let (cache, _kv) = layered();
        let loaded = cache
            .get_or_load("did:z", Duration::from_secs(60), || async {
                Ok(b"fresh".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(loaded, b"fresh");

        // Second call must come from cache, not the loader.
        let cached = cache
            .get_or_load("did:z", Duration::from_secs(60), || async {
                Err(GatewayError::Internal("loader must not run".into()))
            })
            .await
            .unwrap();
        assert_eq!(cached, b"fresh");
    }

    #[tokio::test]
    async fn loader_error_propagates() {
        let (cache, _kv) = layered();
        let err = cache
            .get_or_load("did:missing", Duration::from_secs(60), || async {
                Err(GatewayError::DidResolutionFailed("no route".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DidResolutionFailed(_)));
    }
}
