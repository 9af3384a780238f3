use axum::{
    body::{Body, Bytes},
    extract::{OriginalUri, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::crypto::redact_did;
use crate::error::GatewayError;
use crate::policy;

/// Header carrying the verified caller identity to the upstream.
pub const DID_SUBJECT_HEADER: &str = "x-did-subject";

/// Request headers never forwarded upstream.
const STRIPPED_REQUEST_HEADERS: [&str; 5] = [
    "authorization",
    "host",
    "connection",
    "content-length",
    DID_SUBJECT_HEADER,
];

/// Response headers the proxy re-frames itself.
const STRIPPED_RESPONSE_HEADERS: [&str; 3] = ["connection", "transfer-encoding", "content-length"];

#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub base: String,
}

/// Gated reverse proxy for `/api/*`: token verify (extractor), policy match
/// and evaluation, rate limit, then forward with `Authorization` stripped
/// and the subject DID injected. The upstream response streams back
/// verbatim.
pub async fn proxy(
    State(state): State<AppState>,
    OriginalUri(orig): OriginalUri,
    auth_user: AuthUser,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let path = orig.path();

    let matched = state.policy_engine.match_route(path).await?;
    if matched.is_deny_all() {
        // A token was presented (the extractor ran), so prefer 403 over 404.
        return Err(GatewayError::RouteForbidden);
    }
    policy::evaluate(&matched, &auth_user.claims)?;
    state.rate_limiter.check(&auth_user.did, &matched).await?;

    let path_and_query = orig
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let dest = format!("{}{}", state.proxy.base.trim_end_matches('/'), path_and_query);

    let mut request = state
        .proxy
        .client
        .request(
            reqwest::Method::from_bytes(method.as_str().as_bytes())
                .map_err(|_| GatewayError::MalformedRequest("unsupported method".into()))?,
            &dest,
        )
        .body(body);

    for (name, value) in headers.iter() {
        if STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        request = request.header(name.as_str(), value.as_bytes());
    }
    request = request.header(DID_SUBJECT_HEADER, &auth_user.did);

    let upstream = request.send().await.map_err(|e| {
        metrics::counter!("proxy_upstream_errors_total", 1);
        tracing::error!(
            did = %redact_did(&auth_user.did),
            error = %e,
            "failed to contact upstream"
        );
        GatewayError::UpstreamError("failed to contact upstream".into())
    })?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| GatewayError::Internal(format!("response assembly: {e}")))
}
