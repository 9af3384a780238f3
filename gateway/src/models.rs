use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A credential issuer trusted by the gateway. Only `enabled` issuers may
/// sign accepted credentials.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Issuer {
    pub did: String,
    /// Raw Ed25519 verification key, base64url unpadded.
    pub public_key: String,
    pub enabled: bool,
    /// 1 (lowest) ..= 5 (highest reputation).
    pub trust_tier: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Simplified status list: the set of revoked credential `jti` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationList {
    pub list_id: String,
    #[serde(default)]
    pub revoked: HashSet<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustTier(pub i16);

impl TrustTier {
    pub const MIN: i16 = 1;
    pub const MAX: i16 = 5;

    pub fn validate(tier: i16) -> bool {
        (Self::MIN..=Self::MAX).contains(&tier)
    }
}
