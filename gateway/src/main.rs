use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vouch_gateway::{
    app::{self, AppState, TokenIssuer},
    cache::LayeredCache,
    challenge::{ChallengeConfig, ChallengeService, DEFAULT_CHALLENGE_LIFETIME},
    config::GatewayConfig,
    db,
    kv::{KvStore, MemoryKv, RedisKv},
    metrics::MetricsRecorder,
    middleware::admin::AdminToken,
    middleware::rate_limit::{ChallengeThrottle, DidRateLimiter},
    policy::PolicyEngine,
    proxy::ProxyState,
    resolver::{DidResolver, ResolverConfig},
    stores::{IssuerRegistry, PolicyStore, RevocationStore},
    token::TokenSigner,
    vc::VcVerifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Default to warn in production, debug in development
    let log_level = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            {
                "debug".to_string()
            }

            #[cfg(not(debug_assertions))]
            {
                "warn".to_string()
            }
        });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting vouch gateway");

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        listen_addr = %config.listen_addr,
        upstream = %config.upstream_url,
        token_keys = config.token_keys.len(),
        redis_configured = config.redis_addr.is_some(),
        "Configuration loaded"
    );
    if let Some(endpoint) = &config.otlp_endpoint {
        // Accepted for operators that wire an OTLP collector; trace export
        // itself is handled outside this binary.
        tracing::info!(endpoint = %endpoint, "OTLP endpoint configured");
    }

    let metrics_recorder = MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("Metrics initialized");

    let db_pool = db::init_db(&config.postgres_dsn).await?;
    tracing::info!("Database initialized");

    let kv: Arc<dyn KvStore> = match &config.redis_addr {
        Some(addr) => {
            let redis = RedisKv::connect(addr).await?;
            tracing::info!("Connected to shared KV");
            Arc::new(redis)
        }
        None => {
            tracing::warn!("REDIS_ADDR not set; using in-process KV (single replica only)");
            Arc::new(MemoryKv::new())
        }
    };

    let cache = Arc::new(LayeredCache::new(kv.clone()));

    let policy_store: Arc<dyn PolicyStore> = Arc::new(db::PgPolicyStore::new(db_pool.clone()));
    let issuer_registry: Arc<dyn IssuerRegistry> =
        Arc::new(db::PgIssuerRegistry::new(db_pool.clone()));
    let revocation_store: Arc<dyn RevocationStore> =
        Arc::new(db::PgRevocationStore::new(db_pool.clone()));

    let resolver = Arc::new(DidResolver::new(
        cache.clone(),
        ResolverConfig {
            ion_resolver_url: config.ion_resolver_url.clone(),
            ..ResolverConfig::default()
        },
    ));

    let challenges = Arc::new(ChallengeService::new(
        kv.clone(),
        ChallengeConfig {
            audience: config.challenge_audience.clone(),
            domain: config.challenge_domain.clone(),
            lifetime: DEFAULT_CHALLENGE_LIFETIME,
        },
    ));

    let state = AppState {
        kv: kv.clone(),
        cache: cache.clone(),
        resolver,
        challenges,
        challenge_throttle: Arc::new(ChallengeThrottle::default()),
        vc_verifier: Arc::new(VcVerifier::new(
            issuer_registry.clone(),
            revocation_store.clone(),
            cache.clone(),
        )),
        token_signer: Arc::new(TokenSigner::new(config.token_keys.clone())?),
        token_issuer: TokenIssuer(Arc::from(config.token_issuer.as_str())),
        policy_engine: Arc::new(PolicyEngine::new(policy_store.clone(), cache.clone())),
        rate_limiter: Arc::new(DidRateLimiter::new(kv.clone())),
        policy_store,
        issuer_registry,
        revocation_store,
        proxy: ProxyState {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base: config.upstream_url.clone(),
        },
        admin_token: AdminToken::new(config.admin_token.clone()),
    };

    let mut router = app::router(state);

    // Only expose metrics when explicitly enabled
    if matches!(
        std::env::var("ENABLE_METRICS").as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    ) {
        router = router.merge(app::metrics_router(metrics_handle));
        tracing::info!("Metrics endpoint enabled");
    }

    tracing::info!("Gateway listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
