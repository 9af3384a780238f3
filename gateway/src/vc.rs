use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LayeredCache;
use crate::crypto::redact_did;
use crate::didkey;
use crate::error::GatewayError;
use crate::models::RevocationList;
use crate::stores::{IssuerRegistry, RevocationStore};

/// VC type that unlocks the `premium` scope.
pub const PREMIUM_VC_TYPE: &str = "PremiumCredential";

/// Status list consulted for every credential; jti values are globally
/// unique across issuers in this deployment.
pub const DEFAULT_REVOCATION_LIST: &str = "default";

/// Revocation data may be stale at most this long.
const REVOCATION_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct VcHeader {
    alg: String,
}

#[derive(Debug, Default, Deserialize)]
struct VcBody {
    #[serde(rename = "type", default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VcPayload {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(default)]
    vc: VcBody,
}

/// Verified credential claims handed to the token minting step.
#[derive(Debug, Clone)]
pub struct VcClaims {
    pub issuer: String,
    pub subject: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub types: Vec<String>,
    pub trust_tier: i16,
}

/// Verifies JWT-VCs: EdDSA signature against the issuer registry, validity
/// window, and status-list revocation.
pub struct VcVerifier {
    issuers: Arc<dyn IssuerRegistry>,
    revocations: Arc<dyn RevocationStore>,
    cache: Arc<LayeredCache>,
}

impl VcVerifier {
    pub fn new(
        issuers: Arc<dyn IssuerRegistry>,
        revocations: Arc<dyn RevocationStore>,
        cache: Arc<LayeredCache>,
    ) -> Self {
        Self {
            issuers,
            revocations,
            cache,
        }
    }

    pub async fn verify_credential(
        &self,
        jwt: &str,
        expected_subject: &str,
    ) -> Result<VcClaims, GatewayError> {
        let parts: Vec<&str> = jwt.split('.').collect();
        if parts.len() != 3 {
            return Err(GatewayError::InvalidSignature);
        }

        let header_json = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|_| GatewayError::InvalidSignature)?;
        let payload_json = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|_| GatewayError::InvalidSignature)?;

        let header: VcHeader =
            serde_json::from_slice(&header_json).map_err(|_| GatewayError::InvalidSignature)?;
        if header.alg != "EdDSA" {
            tracing::warn!(alg = %header.alg, "credential with unsupported algorithm");
            return Err(GatewayError::InvalidSignature);
        }

        let payload: VcPayload =
            serde_json::from_slice(&payload_json).map_err(|_| GatewayError::InvalidSignature)?;

        if payload.sub != expected_subject {
            return Err(GatewayError::SubjectMismatch);
        }

        let now = Utc::now().timestamp();
        if now < payload.iat || now >= payload.exp {
            return Err(GatewayError::CredentialExpired);
        }

        let issuer = self
            .issuers
            .get(&payload.iss)
            .await?
            .ok_or(GatewayError::UntrustedIssuer)?;
        if !issuer.enabled {
            tracing::warn!(
                issuer = %redact_did(&issuer.did),
                "credential from disabled issuer"
            );
            return Err(GatewayError::UntrustedIssuer);
        }

        let key_bytes = didkey::decode_key_b64(&issuer.public_key)
            .map_err(|e| GatewayError::Internal(format!("stored issuer key: {e}")))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| GatewayError::Internal(format!("stored issuer key: {e}")))?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| GatewayError::InvalidSignature)?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| GatewayError::InvalidSignature)?;
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| GatewayError::InvalidSignature)?;

        if self.is_revoked(&payload.jti).await? {
            return Err(GatewayError::CredentialRevoked);
        }

        Ok(VcClaims {
            issuer: payload.iss,
            subject: payload.sub,
            iat: payload.iat,
            exp: payload.exp,
            jti: payload.jti,
            types: payload.vc.types,
            trust_tier: issuer.trust_tier,
        })
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, GatewayError> {
        let key = format!("rev:{DEFAULT_REVOCATION_LIST}");
        let bytes = self
            .cache
            .get_or_load(&key, REVOCATION_CACHE_TTL, || async {
                let revoked: HashSet<String> = self
                    .revocations
                    .get(DEFAULT_REVOCATION_LIST)
                    .await?
                    .map(|list: RevocationList| list.revoked)
                    .unwrap_or_default();
                serde_json::to_vec(&revoked)
                    .map_err(|e| GatewayError::Internal(format!("revocation encoding: {e}")))
            })
            .await?;
        let revoked: HashSet<String> = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Internal(format!("revocation decoding: {e}")))?;
        Ok(revoked.contains(jti))
    }
}
