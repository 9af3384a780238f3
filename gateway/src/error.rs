use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::kv::KvError;
use crate::stores::StoreError;

/// Gateway error taxonomy. Every component returns these; the HTTP mapping
/// lives in the single [`IntoResponse`] impl below.
#[derive(Debug, Error)]
pub enum GatewayError {
    // -- input parsing ------------------------------------------------------
    #[error("invalid DID format: {0}")]
    InvalidDidFormat(String),

    #[error("unsupported DID method: {0}")]
    UnsupportedDidMethod(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    // -- challenge ----------------------------------------------------------
    #[error("challenge expired")]
    ChallengeExpired,

    #[error("nonce unknown or already used")]
    NonceUnknownOrReused,

    #[error("challenge bound to a different subject")]
    ChallengeSubjectMismatch,

    // -- crypto -------------------------------------------------------------
    #[error("invalid signature")]
    InvalidSignature,

    #[error("credential expired or not yet valid")]
    CredentialExpired,

    #[error("credential revoked")]
    CredentialRevoked,

    #[error("credential issuer not trusted")]
    UntrustedIssuer,

    #[error("credential subject mismatch")]
    SubjectMismatch,

    // -- resolver -----------------------------------------------------------
    #[error("DID resolution failed: {0}")]
    DidResolutionFailed(String),

    #[error("resolver circuit open")]
    CircuitOpen,

    // -- access token -------------------------------------------------------
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthFormat,

    #[error("invalid access token")]
    InvalidToken,

    #[error("access token expired")]
    TokenExpired,

    // -- policy -------------------------------------------------------------
    #[error("requested scope not granted by credentials")]
    ForbiddenScope,

    #[error("insufficient scopes")]
    InsufficientScopes,

    #[error("required credential type missing")]
    MissingVcType,

    #[error("credential issuer not allowed for this route")]
    IssuerNotAllowed,

    #[error("issuer trust tier too low")]
    TrustTierTooLow,

    #[error("no policy permits this route")]
    RouteForbidden,

    // -- limiter / proxy / internal ----------------------------------------
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        use GatewayError::*;
        match self {
            InvalidDidFormat(_) | UnsupportedDidMethod(_) | MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ChallengeExpired
            | NonceUnknownOrReused
            | ChallengeSubjectMismatch
            | InvalidSignature
            | CredentialExpired
            | CredentialRevoked
            | UntrustedIssuer
            | SubjectMismatch
            | DidResolutionFailed(_)
            | CircuitOpen
            | MissingAuthHeader
            | InvalidAuthFormat
            | InvalidToken
            | TokenExpired => StatusCode::UNAUTHORIZED,
            ForbiddenScope | InsufficientScopes | MissingVcType | IssuerNotAllowed
            | TrustTierTooLow | RouteForbidden => StatusCode::FORBIDDEN,
            RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error envelope. All 401-class
    /// failures collapse to `invalid_auth` so responses cannot be used as an
    /// oracle; the precise variant is logged server-side.
    pub fn code(&self) -> &'static str {
        use GatewayError::*;
        match self {
            InvalidDidFormat(_) => "invalid_did",
            UnsupportedDidMethod(_) => "unsupported_did_method",
            MalformedRequest(_) => "malformed_request",
            ChallengeExpired
            | NonceUnknownOrReused
            | ChallengeSubjectMismatch
            | InvalidSignature
            | CredentialExpired
            | CredentialRevoked
            | UntrustedIssuer
            | SubjectMismatch
            | DidResolutionFailed(_)
            | CircuitOpen
            | MissingAuthHeader
            | InvalidAuthFormat
            | InvalidToken
            | TokenExpired => "invalid_auth",
            ForbiddenScope => "forbidden_scope",
            InsufficientScopes => "insufficient_scopes",
            MissingVcType => "missing_vc_type",
            IssuerNotAllowed => "issuer_not_allowed",
            TrustTierTooLow => "trust_tier_too_low",
            RouteForbidden => "route_forbidden",
            RateLimited { .. } => "rate_limited",
            UpstreamError(_) => "upstream_error",
            Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // The uniform envelope hides which auth step failed; keep the real
        // variant in the server log.
        let detail = if code == "invalid_auth" {
            tracing::warn!(error = %self, "authentication failure");
            "authentication failed".to_string()
        } else {
            if status.is_server_error() {
                tracing::error!(error = %self, "request failed");
            }
            self.to_string()
        };

        let body = Json(json!({
            "error": code,
            "detail": detail,
        }));

        if let GatewayError::RateLimited { retry_after } = self {
            return (
                status,
                [(header::RETRY_AFTER, retry_after.to_string())],
                body,
            )
                .into_response();
        }

        (status, body).into_response()
    }
}

impl From<KvError> for GatewayError {
    fn from(err: KvError) -> Self {
        GatewayError::Internal(format!("kv store: {err}"))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Internal(format!("store: {err}"))
    }
}
