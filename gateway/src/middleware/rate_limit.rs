use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use parking_lot::RwLock;
use std::{collections::HashMap, num::NonZeroU32, sync::Arc, time::Duration};

use crate::error::GatewayError;
use crate::kv::KvStore;
use crate::policy::Policy;

/// Per-(DID, policy) fixed-window limiter on the shared KV.
///
/// Each request does one atomic `INCR`; the first increment of a window sets
/// its TTL. Counts are shared across replicas, so over-admission within a
/// window is bounded by the number of concurrent in-flight increments.
pub struct DidRateLimiter {
    kv: Arc<dyn KvStore>,
}

impl DidRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn check(&self, did: &str, policy: &Policy) -> Result<(), GatewayError> {
        let Some(spec) = &policy.rate_limit else {
            return Ok(());
        };

        let key = format!("rate:{}:{}", did, policy.id);
        let window = Duration::from_secs(spec.window_seconds.max(1));
        let count = self.kv.incr(&key, window).await?;

        if count as u64 > spec.max_requests {
            metrics::counter!("gateway_rate_limited_total", 1);
            return Err(GatewayError::RateLimited {
                retry_after: spec.window_seconds,
            });
        }
        Ok(())
    }
}

/// In-process per-DID throttle for the unauthenticated challenge endpoint,
/// a backstop against nonce-minting floods. One direct limiter per DID.
pub struct ChallengeThrottle {
    limiters: RwLock<HashMap<String, Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>>,
    quota: Quota,
}

impl ChallengeThrottle {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).expect("nonzero");
        Self {
            limiters: RwLock::new(HashMap::new()),
            quota: Quota::per_minute(per_minute),
        }
    }

    pub fn check(&self, did: &str) -> Result<(), GatewayError> {
        let limiter = {
            let mut limiters = self.limiters.write();
            limiters
                .entry(did.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
                .clone()
        };

        limiter
            .check()
            .map_err(|_| GatewayError::RateLimited { retry_after: 60 })
    }
}

impl Default for ChallengeThrottle {
    fn default() -> Self {
        Self::new(60)
    }
}
