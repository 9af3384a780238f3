use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Request bodies larger than this are rejected outright.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Strict JSON extractor: caps the body at 1 MiB, rejects trailing data
/// (multiple top-level values), and surfaces deserialization failures in the
/// gateway's error envelope. Unknown-field rejection comes from
/// `#[serde(deny_unknown_fields)]` on the target types.
pub struct StrictJson<T>(pub T);

impl<T, S> FromRequest<S> for StrictJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| {
                GatewayError::MalformedRequest(format!("failed to read body: {e}")).into_response()
            })?;

        if bytes.len() > MAX_BODY_BYTES {
            return Err(GatewayError::MalformedRequest(format!(
                "body exceeds {MAX_BODY_BYTES} bytes"
            ))
            .into_response());
        }

        let mut deserializer = serde_json::Deserializer::from_slice(&bytes);
        let value = T::deserialize(&mut deserializer).map_err(|e| {
            GatewayError::MalformedRequest(format!("invalid JSON body: {e}")).into_response()
        })?;
        deserializer.end().map_err(|_| {
            GatewayError::MalformedRequest("trailing data after JSON body".into()).into_response()
        })?;

        Ok(StrictJson(value))
    }
}
