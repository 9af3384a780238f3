use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LayeredCache;
use crate::error::GatewayError;
use crate::stores::PolicyStore;
use crate::token::AccessClaims;

pub const DENY_ALL_POLICY_ID: &str = "deny-all";

pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 300;

const POLICY_CACHE_KEY: &str = "policy:all";
const POLICY_CACHE_TTL: Duration = Duration::from_secs(30);

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECONDS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub window_seconds: u64,
    pub max_requests: u64,
}

/// Route policy. `route_prefix` values are unique; matching is by longest
/// prefix of the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub route_prefix: String,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub required_vc_types: Vec<String>,
    #[serde(default)]
    pub allowed_issuers: Vec<String>,
    #[serde(default)]
    pub min_trust_tier: Option<i16>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_seconds: u64,
}

impl Policy {
    /// Sentinel returned when no route prefix matches. The proxy rejects
    /// requests that land on it; it never reaches predicate evaluation.
    pub fn deny_all() -> Self {
        Policy {
            id: DENY_ALL_POLICY_ID.to_string(),
            name: "deny-all".to_string(),
            route_prefix: String::new(),
            required_scopes: Vec::new(),
            required_vc_types: Vec::new(),
            allowed_issuers: Vec::new(),
            min_trust_tier: None,
            rate_limit: None,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    pub fn is_deny_all(&self) -> bool {
        self.id == DENY_ALL_POLICY_ID
    }
}

/// Longest-prefix match over a policy slice. Ties are unreachable because
/// prefixes are unique.
pub fn match_route<'a>(policies: &'a [Policy], path: &str) -> Option<&'a Policy> {
    policies
        .iter()
        .filter(|p| !p.route_prefix.is_empty() && path.starts_with(&p.route_prefix))
        .max_by_key(|p| p.route_prefix.len())
}

/// Evaluate a matched policy against token claims.
pub fn evaluate(policy: &Policy, claims: &AccessClaims) -> Result<(), GatewayError> {
    if !policy
        .required_scopes
        .iter()
        .all(|scope| claims.has_scope(scope))
    {
        return Err(GatewayError::InsufficientScopes);
    }

    if !policy.required_vc_types.is_empty() {
        let held = claims.vc_types.as_deref().unwrap_or(&[]);
        if !policy
            .required_vc_types
            .iter()
            .all(|required| held.iter().any(|t| t == required))
        {
            return Err(GatewayError::MissingVcType);
        }
    }

    if !policy.allowed_issuers.is_empty() {
        match claims.vc_issuer.as_deref() {
            Some(issuer) if policy.allowed_issuers.iter().any(|a| a == issuer) => {}
            _ => return Err(GatewayError::IssuerNotAllowed),
        }
    }

    if let Some(min_tier) = policy.min_trust_tier {
        match claims.vc_trust_tier {
            Some(tier) if tier >= min_tier => {}
            _ => return Err(GatewayError::TrustTierTooLow),
        }
    }

    Ok(())
}

/// Policy lookup front. Reads go through the layered cache (readers may see
/// data up to the cache TTL stale); admin writes call `invalidate`.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    cache: Arc<LayeredCache>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>, cache: Arc<LayeredCache>) -> Self {
        Self { store, cache }
    }

    pub async fn load_all(&self) -> Result<Vec<Policy>, GatewayError> {
        let bytes = self
            .cache
            .get_or_load(POLICY_CACHE_KEY, POLICY_CACHE_TTL, || async {
                let policies = self.store.list().await?;
                serde_json::to_vec(&policies)
                    .map_err(|e| GatewayError::Internal(format!("policy encoding: {e}")))
            })
            .await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Internal(format!("policy cache decoding: {e}")))
    }

    pub async fn match_route(&self, path: &str) -> Result<Policy, GatewayError> {
        let policies = self.load_all().await?;
        Ok(match_route(&policies, path)
            .cloned()
            .unwrap_or_else(Policy::deny_all))
    }

    pub async fn invalidate(&self) {
        if let Err(e) = self.cache.delete(POLICY_CACHE_KEY).await {
            tracing::warn!(error = %e, "policy cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy(id: &str, prefix: &str) -> Policy {
        Policy {
            id: id.into(),
            name: id.into(),
            route_prefix: prefix.into(),
            ..Policy::deny_all()
        }
    }

    fn claims() -> AccessClaims {
        let now = Utc::now().timestamp();
        AccessClaims {
            sub: "did:key:z6MkSubject".into(),
            scopes: vec!["basic".into()],
            vc_types: None,
            vc_issuer: None,
            vc_trust_tier: None,
            iss: "vouch-gateway".into(),
            iat: now,
            exp: now + 300,
            jti: "jti".into(),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let policies = vec![
            policy("api", "/api/"),
            policy("basic", "/api/v1/basic"),
            policy("v1", "/api/v1/"),
        ];
        assert_eq!(
            match_route(&policies, "/api/v1/basic/items").unwrap().id,
            "basic"
        );
        assert_eq!(match_route(&policies, "/api/v1/other").unwrap().id, "v1");
        assert_eq!(match_route(&policies, "/api/health").unwrap().id, "api");
        assert!(match_route(&policies, "/metrics").is_none());
    }

    #[test]
    fn no_match_falls_back_to_deny_all() {
        let policies = vec![policy("api", "/api/")];
        assert!(match_route(&policies, "/else").is_none());
        assert!(Policy::deny_all().is_deny_all());
    }

    #[test]
    fn evaluate_checks_scopes() {
        let mut p = policy("p", "/api/");
        p.required_scopes = vec!["basic".into(), "premium".into()];
        assert!(matches!(
            evaluate(&p, &claims()),
            Err(GatewayError::InsufficientScopes)
        ));

        let mut c = claims();
        c.scopes.push("premium".into());
        assert!(evaluate(&p, &c).is_ok());
    }

    #[test]
    fn evaluate_checks_vc_type_issuer_and_tier() {
        let mut p = policy("p", "/api/");
        p.required_vc_types = vec!["PremiumCredential".into()];
        p.allowed_issuers = vec!["did:key:z6MkIssuer".into()];
        p.min_trust_tier = Some(3);

        assert!(matches!(
            evaluate(&p, &claims()),
            Err(GatewayError::MissingVcType)
        ));

        let mut c = claims();
        c.vc_types = Some(vec!["PremiumCredential".into()]);
        assert!(matches!(
            evaluate(&p, &c),
            Err(GatewayError::IssuerNotAllowed)
        ));

        c.vc_issuer = Some("did:key:z6MkIssuer".into());
        assert!(matches!(
            evaluate(&p, &c),
            Err(GatewayError::TrustTierTooLow)
        ));

        c.vc_trust_tier = Some(2);
        assert!(matches!(
            evaluate(&p, &c),
            Err(GatewayError::TrustTierTooLow)
        ));

        c.vc_trust_tier = Some(3);
        assert!(evaluate(&p, &c).is_ok());
    }

    #[tokio::test]
    async fn engine_serves_and_invalidates_cached_policies() {
        use crate::kv::MemoryKv;
        use crate::stores::MemoryPolicyStore;

        let store = Arc::new(MemoryPolicyStore::new());
        let cache = Arc::new(LayeredCache::new(Arc::new(MemoryKv::new())));
        let engine = PolicyEngine::new(store.clone(), cache);

        store.upsert(policy("api", "/api/")).await.unwrap();
        assert_eq!(engine.match_route("/api/x").await.unwrap().id, "api");

        // A new policy is invisible until the cache is invalidated.
        store.upsert(policy("basic", "/api/v1/basic")).await.unwrap();
        assert_eq!(engine.match_route("/api/v1/basic").await.unwrap().id, "api");
        engine.invalidate().await;
        assert_eq!(
            engine.match_route("/api/v1/basic").await.unwrap().id,
            "basic"
        );
    }
}
