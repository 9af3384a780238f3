use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0}")]
    Backend(String),
}

/// Narrow interface over the shared key-value store.
///
/// Backed by Redis in production and by an in-memory map in tests. Two
/// operations carry atomicity contracts the auth pipeline depends on:
///
/// - [`KvStore::pop`] is an atomic delete-returning-prior-value. It is the
///   linearization point for challenge single-use: among concurrent pops of
///   the same key, exactly one observes the value.
/// - [`KvStore::incr`] is an atomic counter increment. The first increment
///   of a key starts its TTL window; this is the rate-limiter fixed window.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError>;

    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Atomically increment `key`, setting `ttl` iff this created the key.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;

    /// Atomically remove `key`, returning the prior value if present.
    async fn pop(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, KvError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// DashMap-backed store for tests and single-process deployments. Expiry is
/// lazy: dead entries are dropped on access.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.live() {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, e| !e.live());
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        // The entry guard holds the shard lock, which makes read-modify-write
        // atomic with respect to other callers of the same key.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: b"0".to_vec(),
            expires_at: Instant::now() + ttl,
        });
        if !entry.live() {
            entry.value = b"0".to_vec();
            entry.expires_at = Instant::now() + ttl;
        }
        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| KvError::Backend(format!("non-numeric counter at {key}")))?;
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        Ok(next)
    }

    async fn pop(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        match self.entries.remove(key) {
            Some((_, entry)) if entry.live() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, KvError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Redis-backed store. `ConnectionManager` multiplexes and reconnects, so a
/// clone per call is cheap.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(addr: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(addr)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
                .await?;
        }
        Ok(count)
    }

    async fn pop(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, KvError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await?;
        Ok(values)
    }
}
