use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::cache::LayeredCache;
use crate::error::GatewayError;
use crate::models::RevocationList;
use crate::stores::RevocationStore;
use crate::util::json_extractor::StrictJson;

/// PUT /v1/revocations/{list_id} (admin). Writes the list and invalidates
/// its cache entry so readers converge well inside the 60 s freshness bound.
#[tracing::instrument(skip_all)]
pub async fn put_revocations(
    State(store): State<Arc<dyn RevocationStore>>,
    State(cache): State<Arc<LayeredCache>>,
    Path(list_id): Path<String>,
    StrictJson(mut list): StrictJson<RevocationList>,
) -> Result<Json<RevocationList>, GatewayError> {
    list.list_id = list_id.clone();
    let revoked_count = list.revoked.len();
    store.put(list.clone()).await?;

    if let Err(e) = cache.delete(&format!("rev:{list_id}")).await {
        tracing::warn!(error = %e, "revocation cache invalidation failed");
    }

    tracing::info!(revoked_count, "revocation list updated");
    Ok(Json(list))
}
