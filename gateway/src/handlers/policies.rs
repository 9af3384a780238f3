use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::policy::{Policy, PolicyEngine, DENY_ALL_POLICY_ID};
use crate::stores::PolicyStore;
use crate::util::json_extractor::StrictJson;

/// GET /v1/policies (admin)
pub async fn list_policies(
    State(store): State<Arc<dyn PolicyStore>>,
) -> Result<Json<Vec<Policy>>, GatewayError> {
    let mut policies = store.list().await?;
    policies.sort_by(|a, b| a.route_prefix.cmp(&b.route_prefix));
    Ok(Json(policies))
}

/// PUT /v1/policies/{id} (admin). The path id wins over any id in the body.
#[tracing::instrument(skip_all)]
pub async fn put_policy(
    State(store): State<Arc<dyn PolicyStore>>,
    State(engine): State<Arc<PolicyEngine>>,
    Path(id): Path<String>,
    StrictJson(mut policy): StrictJson<Policy>,
) -> Result<Json<Policy>, GatewayError> {
    if id == DENY_ALL_POLICY_ID {
        return Err(GatewayError::MalformedRequest(
            "the deny-all sentinel is not writable".into(),
        ));
    }
    if !policy.route_prefix.starts_with('/') {
        return Err(GatewayError::MalformedRequest(
            "route_prefix must start with '/'".into(),
        ));
    }
    if let Some(spec) = &policy.rate_limit {
        if spec.window_seconds == 0 || spec.max_requests == 0 {
            return Err(GatewayError::MalformedRequest(
                "rate_limit window and max must be positive".into(),
            ));
        }
    }
    if policy.token_ttl_seconds == 0 {
        return Err(GatewayError::MalformedRequest(
            "token_ttl_seconds must be positive".into(),
        ));
    }

    policy.id = id;
    store.upsert(policy.clone()).await?;
    engine.invalidate().await;
    tracing::info!(route_prefix = %policy.route_prefix, "policy updated");
    Ok(Json(policy))
}
