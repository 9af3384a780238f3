use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::GatewayError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Shared admin token, compared by digest so the comparison does not leak
/// prefix length through timing.
#[derive(Clone)]
pub struct AdminToken(Arc<str>);

impl AdminToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    fn matches(&self, provided: &str) -> bool {
        Sha256::digest(provided.as_bytes()) == Sha256::digest(self.0.as_bytes())
    }
}

/// Guard for the admin surface: the `X-Admin-Token` header must equal the
/// server-side constant.
pub async fn require_admin(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(value) if token.matches(value) => next.run(request).await,
        _ => {
            tracing::warn!("admin request with missing or wrong token");
            GatewayError::InvalidToken.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_matching() {
        let token = AdminToken::new("super-secret");
        assert!(token.matches("super-secret"));
        assert!(!token.matches("super-secre"));
        assert!(!token.matches(""));
    }
}
