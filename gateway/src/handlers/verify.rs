use axum::{extract::State, Json};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::challenge::parse_nonce;
use crate::crypto::redact_did;
use crate::error::GatewayError;
use crate::resolver::Did;
use crate::token::AccessClaims;
use crate::util::json_extractor::StrictJson;
use crate::vc::PREMIUM_VC_TYPE;

/// Prefix used to pick the policy whose `token_ttl_seconds` applies to
/// freshly minted tokens.
const TOKEN_TTL_MATCH_PATH: &str = "/api/";

pub const SCOPE_BASIC: &str = "basic";
pub const SCOPE_PREMIUM: &str = "premium";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyRequest {
    pub did: String,
    pub challenge: String,
    pub signature: String,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenEnvelope {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// POST /v1/auth/verify
///
/// Consumes the challenge (burning the nonce even on later failure),
/// verifies key possession, optionally verifies a JWT-VC, derives scopes,
/// and mints the access token.
#[tracing::instrument(skip_all)]
pub async fn verify(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<VerifyRequest>,
) -> Result<Json<TokenEnvelope>, GatewayError> {
    let did = Did::parse(&request.did)?;
    let did_str = did.to_string();

    let nonce = parse_nonce(&request.challenge)?;
    state
        .challenges
        .consume(nonce, &did_str, &request.challenge)
        .await
        .inspect_err(|_| metrics::counter!("auth_verification_failures_total", 1))?;

    let public_key = state.resolver.resolve(&did).await?;
    let verifying_key =
        VerifyingKey::from_bytes(&public_key).map_err(|_| GatewayError::InvalidSignature)?;
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(&request.signature)
        .map_err(|_| GatewayError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| GatewayError::InvalidSignature)?;
    verifying_key
        .verify(request.challenge.as_bytes(), &signature)
        .map_err(|_| {
            metrics::counter!("auth_verification_failures_total", 1);
            GatewayError::InvalidSignature
        })?;

    let vc_claims = match &request.credential {
        Some(jwt) => Some(state.vc_verifier.verify_credential(jwt, &did_str).await?),
        None => None,
    };

    // Scope grant: everyone gets `basic`; `premium` requires the matching
    // credential type.
    let mut allowed = vec![SCOPE_BASIC.to_string()];
    if vc_claims
        .as_ref()
        .map(|vc| vc.types.iter().any(|t| t == PREMIUM_VC_TYPE))
        .unwrap_or(false)
    {
        allowed.push(SCOPE_PREMIUM.to_string());
    }

    let scopes = match request.scopes {
        None => allowed,
        Some(requested) => {
            if requested.iter().all(|s| allowed.contains(s)) {
                requested
            } else {
                return Err(GatewayError::ForbiddenScope);
            }
        }
    };

    let ttl_policy = state.policy_engine.match_route(TOKEN_TTL_MATCH_PATH).await?;
    let ttl = ttl_policy.token_ttl_seconds;

    let now = Utc::now().timestamp();
    let claims = AccessClaims {
        sub: did_str.clone(),
        scopes,
        vc_types: vc_claims.as_ref().map(|vc| vc.types.clone()),
        vc_issuer: vc_claims.as_ref().map(|vc| vc.issuer.clone()),
        vc_trust_tier: vc_claims.as_ref().map(|vc| vc.trust_tier),
        iss: state.token_issuer.0.to_string(),
        iat: now,
        exp: now + ttl as i64,
        jti: Uuid::new_v4().to_string(),
    };
    let access_token = state.token_signer.sign(&claims)?;

    metrics::counter!("auth_verifications_total", 1);
    tracing::info!(did = %redact_did(&did_str), "access token minted");

    Ok(Json(TokenEnvelope {
        access_token,
        token_type: "Bearer",
        expires_in: ttl,
    }))
}
