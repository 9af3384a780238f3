use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

use crate::kv::KvStore;
use crate::stores::PolicyStore;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    kv: bool,
    policy_store: bool,
}

/// Liveness probe - checks if the application is running
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe - 200 iff the shared KV and the policy store respond.
/// Upstream reachability is deliberately not probed; upstream failures
/// surface per-request as 502.
pub async fn readiness(
    State(kv): State<Arc<dyn KvStore>>,
    State(policy_store): State<Arc<dyn PolicyStore>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    // Each check owns its own result slot; no shared mutable map.
    let (kv_ready, store_ready) = tokio::join!(check_kv(&kv), check_policy_store(&policy_store));

    let ready = kv_ready && store_ready;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            checks: ReadinessChecks {
                kv: kv_ready,
                policy_store: store_ready,
            },
        }),
    )
}

async fn check_kv(kv: &Arc<dyn KvStore>) -> bool {
    kv.set_with_ttl("health:probe", b"ok", Duration::from_secs(5))
        .await
        .is_ok()
}

async fn check_policy_store(store: &Arc<dyn PolicyStore>) -> bool {
    store.list().await.is_ok()
}
