use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::token::{AccessClaims, TokenSigner};

/// Authenticated caller extracted from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub did: String,
    pub claims: AccessClaims,
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenSigner>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let signer = Arc::<TokenSigner>::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::MissingAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(GatewayError::InvalidAuthFormat)?;

        let claims = signer.verify(token)?;

        Ok(AuthUser {
            did: claims.sub.clone(),
            claims,
        })
    }
}
