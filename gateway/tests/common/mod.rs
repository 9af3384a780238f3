#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::{any, get as axum_get};
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

use vouch_gateway::app::{self, AppState, TokenIssuer};
use vouch_gateway::cache::LayeredCache;
use vouch_gateway::challenge::{ChallengeConfig, ChallengeService, DEFAULT_CHALLENGE_LIFETIME};
use vouch_gateway::didkey;
use vouch_gateway::kv::{KvStore, MemoryKv};
use vouch_gateway::middleware::admin::AdminToken;
use vouch_gateway::middleware::rate_limit::{ChallengeThrottle, DidRateLimiter};
use vouch_gateway::models::Issuer;
use vouch_gateway::policy::{Policy, PolicyEngine, RateLimitSpec};
use vouch_gateway::proxy::ProxyState;
use vouch_gateway::resolver::{DidResolver, ResolverConfig};
pub use vouch_gateway::stores::{IssuerRegistry, PolicyStore, RevocationStore};
use vouch_gateway::stores::{MemoryIssuerRegistry, MemoryPolicyStore, MemoryRevocationStore};
use vouch_gateway::token::{TokenKey, TokenSigner};
use vouch_gateway::vc::VcVerifier;

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub struct Harness {
    pub router: Router,
    pub kv: Arc<MemoryKv>,
    pub policy_store: Arc<MemoryPolicyStore>,
    pub issuer_registry: Arc<MemoryIssuerRegistry>,
    pub revocation_store: Arc<MemoryRevocationStore>,
    pub upstream_base: String,
}

/// Stub upstream the proxy forwards to. The echo route reports the headers
/// the proxy delivered so tests can assert on stripping/injection.
async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/api/v1/basic", axum_get(|| async { "basic ok" }))
        .route("/api/v1/premium", axum_get(|| async { "premium ok" }))
        .route("/api/v1/limited", axum_get(|| async { "limited ok" }))
        .route(
            "/api/v1/echo",
            any(|headers: axum::http::HeaderMap| async move {
                Json(json!({
                    "didSubject": headers
                        .get("x-did-subject")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default(),
                    "hasAuthorization": headers.contains_key(header::AUTHORIZATION),
                }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub async fn harness() -> Harness {
    let upstream_base = spawn_upstream().await;
    harness_with_upstream(upstream_base).await
}

pub async fn harness_with_upstream(upstream_base: String) -> Harness {
    let kv = Arc::new(MemoryKv::new());
    let kv_dyn: Arc<dyn KvStore> = kv.clone();
    let cache = Arc::new(LayeredCache::new(kv_dyn.clone()));

    let policy_store = Arc::new(MemoryPolicyStore::new());
    let issuer_registry = Arc::new(MemoryIssuerRegistry::new());
    let revocation_store = Arc::new(MemoryRevocationStore::new());
    let policy_store_dyn: Arc<dyn PolicyStore> = policy_store.clone();
    let issuer_registry_dyn: Arc<dyn IssuerRegistry> = issuer_registry.clone();
    let revocation_store_dyn: Arc<dyn RevocationStore> = revocation_store.clone();

    let state = AppState {
        kv: kv_dyn.clone(),
        cache: cache.clone(),
        resolver: Arc::new(DidResolver::new(cache.clone(), ResolverConfig::default())),
        challenges: Arc::new(ChallengeService::new(
            kv_dyn.clone(),
            ChallengeConfig {
                audience: "vouch-gateway".into(),
                domain: "gateway.test".into(),
                lifetime: DEFAULT_CHALLENGE_LIFETIME,
            },
        )),
        challenge_throttle: Arc::new(ChallengeThrottle::new(1000)),
        vc_verifier: Arc::new(VcVerifier::new(
            issuer_registry_dyn.clone(),
            revocation_store_dyn.clone(),
            cache.clone(),
        )),
        token_signer: Arc::new(
            TokenSigner::new(vec![TokenKey {
                kid: "k1".into(),
                secret: "integration-test-secret".into(),
            }])
            .unwrap(),
        ),
        token_issuer: TokenIssuer(Arc::from("vouch-gateway")),
        policy_engine: Arc::new(PolicyEngine::new(policy_store_dyn.clone(), cache.clone())),
        rate_limiter: Arc::new(DidRateLimiter::new(kv_dyn.clone())),
        policy_store: policy_store_dyn,
        issuer_registry: issuer_registry_dyn,
        revocation_store: revocation_store_dyn,
        proxy: ProxyState {
            client: reqwest::Client::new(),
            base: upstream_base.clone(),
        },
        admin_token: AdminToken::new(ADMIN_TOKEN),
    };

    Harness {
        router: app::router(state),
        kv,
        policy_store,
        issuer_registry,
        revocation_store,
        upstream_base,
    }
}

// ---------------------------------------------------------------------------
// Wallet-side helpers
// ---------------------------------------------------------------------------

pub struct Wallet {
    pub signing: SigningKey,
    pub did: String,
}

impl Wallet {
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let did = didkey::encode_did_key(&signing.verifying_key().to_bytes());
        Self { signing, did }
    }

    pub fn sign_challenge(&self, challenge: &str) -> String {
        let signature = self.signing.sign(challenge.as_bytes());
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    }
}

/// Issuer-side JWT-VC minting, the shape the external issuer service emits.
pub fn mint_vc(
    issuer_key: &SigningKey,
    issuer_did: &str,
    subject_did: &str,
    jti: &str,
    types: &[&str],
) -> String {
    let now = Utc::now().timestamp();
    let header =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": "EdDSA", "typ": "JWT"})).unwrap());
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&json!({
            "iss": issuer_did,
            "sub": subject_did,
            "iat": now - 10,
            "exp": now + 600,
            "jti": jti,
            "vc": {"type": types},
        }))
        .unwrap(),
    );
    let signing_input = format!("{header}.{payload}");
    let signature = issuer_key.sign(signing_input.as_bytes());
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

pub async fn seed_issuer(harness: &Harness, trust_tier: i16) -> (SigningKey, String) {
    let key = SigningKey::generate(&mut OsRng);
    let pk = key.verifying_key().to_bytes();
    let did = didkey::encode_did_key(&pk);
    harness
        .issuer_registry
        .upsert(Issuer {
            did: did.clone(),
            public_key: didkey::encode_key_b64(&pk),
            enabled: true,
            trust_tier,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    (key, did)
}

pub fn basic_policy() -> Policy {
    Policy {
        id: "basic".into(),
        name: "basic tier".into(),
        route_prefix: "/api/v1/basic".into(),
        required_scopes: vec!["basic".into()],
        required_vc_types: vec![],
        allowed_issuers: vec![],
        min_trust_tier: None,
        rate_limit: None,
        token_ttl_seconds: 300,
    }
}

pub fn premium_policy(issuer_did: &str) -> Policy {
    Policy {
        id: "premium".into(),
        name: "premium tier".into(),
        route_prefix: "/api/v1/premium".into(),
        required_scopes: vec!["premium".into()],
        required_vc_types: vec!["PremiumCredential".into()],
        allowed_issuers: vec![issuer_did.to_string()],
        min_trust_tier: Some(3),
        rate_limit: None,
        token_ttl_seconds: 300,
    }
}

pub fn limited_policy(max_requests: u64) -> Policy {
    Policy {
        id: "limited".into(),
        name: "rate limited tier".into(),
        route_prefix: "/api/v1/limited".into(),
        required_scopes: vec!["basic".into()],
        required_vc_types: vec![],
        allowed_issuers: vec![],
        min_trust_tier: None,
        rate_limit: Some(RateLimitSpec {
            window_seconds: 60,
            max_requests,
        }),
        token_ttl_seconds: 300,
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, uri: &str) -> Response {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn get_auth(router: &Router, uri: &str, token: &str) -> Response {
    send(
        router,
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> Response {
    send(
        router,
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn put_json_admin(router: &Router, uri: &str, body: &Value) -> Response {
    send(
        router,
        Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-admin-token", ADMIN_TOKEN)
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Full challenge → sign → verify flow; returns the bearer token.
pub async fn authenticate(
    harness: &Harness,
    wallet: &Wallet,
    scopes: Option<Vec<&str>>,
    credential: Option<String>,
) -> Result<String, (StatusCode, Value)> {
    let response = get(
        &harness.router,
        &format!("/v1/auth/challenge?did={}", wallet.did),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let challenge_body = body_json(response).await;
    let challenge = challenge_body["challenge"].as_str().unwrap().to_string();

    let mut verify_body = json!({
        "did": wallet.did,
        "challenge": challenge,
        "signature": wallet.sign_challenge(&challenge),
    });
    if let Some(scopes) = scopes {
        verify_body["scopes"] = json!(scopes);
    }
    if let Some(credential) = credential {
        verify_body["credential"] = json!(credential);
    }

    let response = post_json(&harness.router, "/v1/auth/verify", &verify_body).await;
    let status = response.status();
    let body = body_json(response).await;
    if status != StatusCode::OK {
        return Err((status, body));
    }
    Ok(body["access_token"].as_str().unwrap().to_string())
}
