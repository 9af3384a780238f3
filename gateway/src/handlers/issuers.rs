use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::didkey;
use crate::error::GatewayError;
use crate::models::{Issuer, TrustTier};
use crate::resolver::Did;
use crate::stores::IssuerRegistry;
use crate::util::json_extractor::StrictJson;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerUpsert {
    pub public_key: String,
    pub enabled: bool,
    pub trust_tier: i16,
}

/// GET /v1/issuers (admin)
pub async fn list_issuers(
    State(registry): State<Arc<dyn IssuerRegistry>>,
) -> Result<Json<Vec<Issuer>>, GatewayError> {
    Ok(Json(registry.list().await?))
}

/// PUT /v1/issuers/{did} (admin)
#[tracing::instrument(skip_all)]
pub async fn put_issuer(
    State(registry): State<Arc<dyn IssuerRegistry>>,
    Path(did): Path<String>,
    StrictJson(body): StrictJson<IssuerUpsert>,
) -> Result<Json<Issuer>, GatewayError> {
    let did = Did::parse(&did)?;
    if !TrustTier::validate(body.trust_tier) {
        return Err(GatewayError::MalformedRequest(format!(
            "trust_tier must be within {}..={}",
            TrustTier::MIN,
            TrustTier::MAX
        )));
    }
    // Stored keys are raw 32-byte Ed25519, base64url; reject anything else
    // now rather than at verification time.
    didkey::decode_key_b64(&body.public_key)
        .map_err(|e| GatewayError::MalformedRequest(format!("public_key: {e}")))?;

    let now = Utc::now();
    let issuer = Issuer {
        did: did.to_string(),
        public_key: body.public_key,
        enabled: body.enabled,
        trust_tier: body.trust_tier,
        created_at: now,
        updated_at: now,
    };
    registry.upsert(issuer.clone()).await?;
    tracing::info!(enabled = issuer.enabled, trust_tier = issuer.trust_tier, "issuer updated");
    Ok(Json(issuer))
}
