use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::challenge::ChallengeService;
use crate::crypto::redact_did;
use crate::error::GatewayError;
use crate::middleware::rate_limit::ChallengeThrottle;
use crate::resolver::{Did, DidResolver};

#[derive(Debug, Deserialize)]
pub struct ChallengeParams {
    pub did: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: String,
    pub nonce: String,
    pub expires_at: i64,
    pub audience: String,
    pub domain: String,
}

/// GET /v1/auth/challenge?did=…
///
/// Only a malformed DID fails the request; resolution errors are logged and
/// surface on verify instead.
#[tracing::instrument(skip_all)]
pub async fn issue_challenge(
    State(challenges): State<Arc<ChallengeService>>,
    State(throttle): State<Arc<ChallengeThrottle>>,
    State(resolver): State<Arc<DidResolver>>,
    Query(params): Query<ChallengeParams>,
) -> Result<Json<ChallengeResponse>, GatewayError> {
    let did = Did::parse(&params.did)?;
    throttle.check(&params.did)?;

    // Warm the resolver cache so the verify call does not pay the remote
    // round-trip.
    if let Err(e) = resolver.resolve(&did).await {
        tracing::debug!(
            did = %redact_did(&params.did),
            error = %e,
            "eager resolution failed, deferring to verify"
        );
    }

    let issued = challenges.issue(&did).await?;
    metrics::counter!("auth_challenges_issued_total", 1);

    Ok(Json(ChallengeResponse {
        challenge: issued.challenge,
        nonce: issued.nonce,
        expires_at: issued.expires_at,
        audience: issued.audience,
        domain: issued.domain,
    }))
}
