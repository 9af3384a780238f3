use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Claims carried by a gateway access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vc_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vc_issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vc_trust_tier: Option<i16>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl AccessClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Symmetric signing key. The secret never appears in logs or responses.
#[derive(Clone, Deserialize)]
pub struct TokenKey {
    pub kid: String,
    pub secret: String,
}

impl std::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKey")
            .field("kid", &self.kid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// HS256 token signer with key rotation.
///
/// The first key signs; all keys verify. Rotation appends a new active key
/// and keeps the legacy keys for the longest outstanding token TTL.
pub struct TokenSigner {
    keys: Vec<TokenKey>,
}

impl TokenSigner {
    pub fn new(keys: Vec<TokenKey>) -> Result<Self, GatewayError> {
        if keys.is_empty() {
            return Err(GatewayError::Internal("token signer needs at least one key".into()));
        }
        Ok(Self { keys })
    }

    fn active(&self) -> &TokenKey {
        &self.keys[0]
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, GatewayError> {
        let key = self.active();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &EncodingKey::from_secret(key.secret.as_bytes()))
            .map_err(|e| GatewayError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify against the key named by `kid` first, then every other known
    /// key. Only a token that validates under none of them is rejected.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, GatewayError> {
        let header = decode_header(token).map_err(|_| GatewayError::InvalidToken)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let mut ordered: Vec<&TokenKey> = Vec::with_capacity(self.keys.len());
        if let Some(kid) = header.kid.as_deref() {
            ordered.extend(self.keys.iter().filter(|k| k.kid == kid));
        }
        ordered.extend(
            self.keys
                .iter()
                .filter(|k| Some(k.kid.as_str()) != header.kid.as_deref()),
        );

        for key in ordered {
            match decode::<AccessClaims>(
                token,
                &DecodingKey::from_secret(key.secret.as_bytes()),
                &validation,
            ) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) => {
                    // Signature checked out under this key; the token is
                    // simply past exp.
                    return Err(GatewayError::TokenExpired);
                }
                Err(_) => continue,
            }
        }
        Err(GatewayError::InvalidToken)
    }
}
