use axum::{
    extract::FromRef,
    routing::{any, get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::LayeredCache;
use crate::challenge::ChallengeService;
use crate::handlers;
use crate::health;
use crate::kv::KvStore;
use crate::metrics;
use crate::middleware::admin::{self, AdminToken};
use crate::middleware::rate_limit::{ChallengeThrottle, DidRateLimiter};
use crate::policy::PolicyEngine;
use crate::proxy::{self, ProxyState};
use crate::resolver::DidResolver;
use crate::stores::{IssuerRegistry, PolicyStore, RevocationStore};
use crate::token::TokenSigner;
use crate::vc::VcVerifier;

/// Issuer string stamped into minted access tokens.
#[derive(Clone)]
pub struct TokenIssuer(pub Arc<str>);

/// Composite state; `FromRef` lets each handler pull only what it needs.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub cache: Arc<LayeredCache>,
    pub resolver: Arc<DidResolver>,
    pub challenges: Arc<ChallengeService>,
    pub challenge_throttle: Arc<ChallengeThrottle>,
    pub vc_verifier: Arc<VcVerifier>,
    pub token_signer: Arc<TokenSigner>,
    pub token_issuer: TokenIssuer,
    pub policy_engine: Arc<PolicyEngine>,
    pub rate_limiter: Arc<DidRateLimiter>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub issuer_registry: Arc<dyn IssuerRegistry>,
    pub revocation_store: Arc<dyn RevocationStore>,
    pub proxy: ProxyState,
    pub admin_token: AdminToken,
}

/// Compose the gateway router. The metrics endpoint is mounted separately in
/// `main` because its state is the Prometheus handle, not [`AppState`].
pub fn router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/v1/auth/challenge", get(handlers::issue_challenge))
        .route("/v1/auth/verify", post(handlers::verify))
        .with_state(state.clone());

    let admin_router = Router::new()
        .route("/v1/policies", get(handlers::list_policies))
        .route("/v1/policies/{id}", put(handlers::put_policy))
        .route("/v1/issuers", get(handlers::list_issuers))
        .route("/v1/issuers/{did}", put(handlers::put_issuer))
        .route("/v1/revocations/{list_id}", put(handlers::put_revocations))
        .layer(axum::middleware::from_fn_with_state(
            state.admin_token.clone(),
            admin::require_admin,
        ))
        .with_state(state.clone());

    let proxy_router = Router::new()
        .route("/api/{*rest}", any(proxy::proxy))
        .with_state(state.clone());

    let health_router = Router::new()
        .route("/healthz", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .with_state(state);

    Router::new()
        .merge(auth_router)
        .merge(admin_router)
        .merge(proxy_router)
        .merge(health_router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(metrics::track_request_metrics))
}

/// Metrics endpoint router, merged by `main` when metrics are enabled.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(handle)
}
