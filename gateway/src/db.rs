use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashSet;
use std::time::Duration;

use crate::models::{Issuer, RevocationList};
use crate::policy::{Policy, RateLimitSpec};
use crate::stores::{IssuerRegistry, PolicyStore, RevocationStore, StoreError};

pub type DbPool = PgPool;

// Pool sizing. Reads on the hot path are cache-fronted and writes are
// admin-only, so a small pool is enough.
const POOL_MAX_CONNECTIONS: u32 = 10;
const POOL_MIN_CONNECTIONS: u32 = 2;
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Connect to the policy/issuer/revocation store and run migrations.
/// DSN parsing and validation belong to [`crate::config`]; this takes the
/// resolved value.
pub async fn init_db(dsn: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNECTIONS)
        .min_connections(POOL_MIN_CONNECTIONS)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .idle_timeout(POOL_IDLE_TIMEOUT)
        .connect(dsn)
        .await
        .context("Failed to connect to policy store")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

// =============================================================================
// Policy store
// =============================================================================

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: String,
    name: String,
    route_prefix: String,
    required_scopes: Vec<String>,
    required_vc_types: Vec<String>,
    allowed_issuers: Vec<String>,
    min_trust_tier: Option<i16>,
    rate_window_seconds: Option<i64>,
    rate_max_requests: Option<i64>,
    token_ttl_seconds: i64,
}

impl From<PolicyRow> for Policy {
    fn from(row: PolicyRow) -> Self {
        let rate_limit = match (row.rate_window_seconds, row.rate_max_requests) {
            (Some(window), Some(max)) => Some(RateLimitSpec {
                window_seconds: window.max(0) as u64,
                max_requests: max.max(0) as u64,
            }),
            _ => None,
        };
        Policy {
            id: row.id,
            name: row.name,
            route_prefix: row.route_prefix,
            required_scopes: row.required_scopes,
            required_vc_types: row.required_vc_types,
            allowed_issuers: row.allowed_issuers,
            min_trust_tier: row.min_trust_tier,
            rate_limit,
            token_ttl_seconds: row.token_ttl_seconds.max(0) as u64,
        }
    }
}

const POLICY_COLUMNS: &str = "id, name, route_prefix, required_scopes, required_vc_types, \
     allowed_issuers, min_trust_tier, rate_window_seconds, rate_max_requests, token_ttl_seconds";

pub struct PgPolicyStore {
    pool: DbPool,
}

impl PgPolicyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn list(&self) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies ORDER BY route_prefix"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Policy::from).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Policy::from))
    }

    async fn upsert(&self, policy: Policy) -> Result<(), StoreError> {
        let (window, max) = match &policy.rate_limit {
            Some(spec) => (Some(spec.window_seconds as i64), Some(spec.max_requests as i64)),
            None => (None, None),
        };
        sqlx::query(
            "INSERT INTO policies (id, name, route_prefix, required_scopes, required_vc_types,
                                   allowed_issuers, min_trust_tier, rate_window_seconds,
                                   rate_max_requests, token_ttl_seconds, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 route_prefix = EXCLUDED.route_prefix,
                 required_scopes = EXCLUDED.required_scopes,
                 required_vc_types = EXCLUDED.required_vc_types,
                 allowed_issuers = EXCLUDED.allowed_issuers,
                 min_trust_tier = EXCLUDED.min_trust_tier,
                 rate_window_seconds = EXCLUDED.rate_window_seconds,
                 rate_max_requests = EXCLUDED.rate_max_requests,
                 token_ttl_seconds = EXCLUDED.token_ttl_seconds,
                 updated_at = now()",
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(&policy.route_prefix)
        .bind(&policy.required_scopes)
        .bind(&policy.required_vc_types)
        .bind(&policy.allowed_issuers)
        .bind(policy.min_trust_tier)
        .bind(window)
        .bind(max)
        .bind(policy.token_ttl_seconds as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Issuer registry
// =============================================================================

pub struct PgIssuerRegistry {
    pool: DbPool,
}

impl PgIssuerRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IssuerRegistry for PgIssuerRegistry {
    async fn list(&self) -> Result<Vec<Issuer>, StoreError> {
        let issuers = sqlx::query_as::<_, Issuer>(
            "SELECT did, public_key, enabled, trust_tier, created_at, updated_at
             FROM issuers ORDER BY did",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(issuers)
    }

    async fn get(&self, did: &str) -> Result<Option<Issuer>, StoreError> {
        let issuer = sqlx::query_as::<_, Issuer>(
            "SELECT did, public_key, enabled, trust_tier, created_at, updated_at
             FROM issuers WHERE did = $1",
        )
        .bind(did)
        .fetch_optional(&self.pool)
        .await?;
        Ok(issuer)
    }

    async fn upsert(&self, issuer: Issuer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO issuers (did, public_key, enabled, trust_tier, created_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             ON CONFLICT (did) DO UPDATE SET
                 public_key = EXCLUDED.public_key,
                 enabled = EXCLUDED.enabled,
                 trust_tier = EXCLUDED.trust_tier,
                 updated_at = now()",
        )
        .bind(&issuer.did)
        .bind(&issuer.public_key)
        .bind(issuer.enabled)
        .bind(issuer.trust_tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Revocation store
// =============================================================================

#[derive(sqlx::FromRow)]
struct RevocationRow {
    list_id: String,
    revoked: Vec<String>,
    updated_at: DateTime<Utc>,
}

pub struct PgRevocationStore {
    pool: DbPool,
}

impl PgRevocationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    async fn get(&self, list_id: &str) -> Result<Option<RevocationList>, StoreError> {
        let row = sqlx::query_as::<_, RevocationRow>(
            "SELECT list_id, revoked, updated_at FROM revocation_lists WHERE list_id = $1",
        )
        .bind(list_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| RevocationList {
            list_id: r.list_id,
            revoked: HashSet::from_iter(r.revoked),
            updated_at: r.updated_at,
        }))
    }

    async fn put(&self, list: RevocationList) -> Result<(), StoreError> {
        let revoked: Vec<String> = list.revoked.into_iter().collect();
        sqlx::query(
            "INSERT INTO revocation_lists (list_id, revoked, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (list_id) DO UPDATE SET
                 revoked = EXCLUDED.revoked,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&list.list_id)
        .bind(&revoked)
        .bind(list.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
