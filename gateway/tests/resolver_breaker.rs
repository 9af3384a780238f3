use std::sync::Arc;
use std::time::{Duration, Instant};

use vouch_gateway::cache::LayeredCache;
use vouch_gateway::error::GatewayError;
use vouch_gateway::kv::MemoryKv;
use vouch_gateway::resilience::BreakerConfig;
use vouch_gateway::resolver::{Did, DidResolver, ResolverConfig};

/// did:web pointing at a loopback port nothing listens on: every fetch fails
/// with connection refused, quickly.
const UNREACHABLE_WEB_DID: &str = "did:web:127.0.0.1%3A1";

fn unreachable_resolver(reset_timeout: Duration) -> (DidResolver, Arc<LayeredCache>) {
    let cache = Arc::new(LayeredCache::new(Arc::new(MemoryKv::new())));
    let resolver = DidResolver::new(
        cache.clone(),
        ResolverConfig {
            web_breaker: BreakerConfig {
                max_failures: 5,
                call_timeout: Duration::from_secs(5),
                reset_timeout,
            },
            web_attempts: 2,
            retry_initial: Duration::from_millis(5),
            ..ResolverConfig::default()
        },
    );
    (resolver, cache)
}

#[tokio::test]
async fn breaker_opens_after_consecutive_web_failures_and_short_circuits() {
    let (resolver, _cache) = unreachable_resolver(Duration::from_secs(60));
    let did = Did::parse(UNREACHABLE_WEB_DID).unwrap();

    for attempt in 0..5 {
        let err = resolver.resolve(&did).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::DidResolutionFailed(_)),
            "attempt {attempt}: {err}"
        );
    }

    // Sixth call short-circuits without touching the network.
    let start = Instant::now();
    let err = resolver.resolve(&did).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen), "got {err}");
    assert!(
        start.elapsed() < Duration::from_millis(50),
        "open breaker must answer immediately, took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn breaker_probes_again_after_the_reset_timeout() {
    let (resolver, _cache) = unreachable_resolver(Duration::from_millis(150));
    let did = Did::parse(UNREACHABLE_WEB_DID).unwrap();

    for _ in 0..5 {
        let _ = resolver.resolve(&did).await.unwrap_err();
    }
    assert!(matches!(
        resolver.resolve(&did).await.unwrap_err(),
        GatewayError::CircuitOpen
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Half-open: the next call is a real (failing) network attempt again.
    assert!(matches!(
        resolver.resolve(&did).await.unwrap_err(),
        GatewayError::DidResolutionFailed(_)
    ));
}

#[tokio::test]
async fn open_breaker_still_serves_cached_resolutions() {
    let (resolver, cache) = unreachable_resolver(Duration::from_secs(60));
    let did = Did::parse(UNREACHABLE_WEB_DID).unwrap();

    // Drive the breaker open first.
    for _ in 0..5 {
        let _ = resolver.resolve(&did).await.unwrap_err();
    }

    // A prior success sits in the cache.
    let pk = [3u8; 32];
    cache
        .set(&format!("did:{did}"), &pk, Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(resolver.resolve(&did).await.unwrap(), pk);
}
