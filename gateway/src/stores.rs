use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use crate::models::{Issuer, RevocationList};
use crate::policy::Policy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Read/write access to route policies. Read-mostly; mutations happen only
/// through the admin endpoints and invalidate the policy cache.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Policy>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Policy>, StoreError>;
    async fn upsert(&self, policy: Policy) -> Result<(), StoreError>;
}

/// Trusted issuer lookup and administration.
#[async_trait]
pub trait IssuerRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<Issuer>, StoreError>;
    async fn get(&self, did: &str) -> Result<Option<Issuer>, StoreError>;
    async fn upsert(&self, issuer: Issuer) -> Result<(), StoreError>;
}

/// Credential status lists keyed by list id.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn get(&self, list_id: &str) -> Result<Option<RevocationList>, StoreError>;
    async fn put(&self, list: RevocationList) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations (tests, local development)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: DashMap<String, Policy>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn list(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(self.policies.iter().map(|p| p.value().clone()).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Policy>, StoreError> {
        Ok(self.policies.get(id).map(|p| p.value().clone()))
    }

    async fn upsert(&self, policy: Policy) -> Result<(), StoreError> {
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryIssuerRegistry {
    issuers: DashMap<String, Issuer>,
}

impl MemoryIssuerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IssuerRegistry for MemoryIssuerRegistry {
    async fn list(&self) -> Result<Vec<Issuer>, StoreError> {
        Ok(self.issuers.iter().map(|i| i.value().clone()).collect())
    }

    async fn get(&self, did: &str) -> Result<Option<Issuer>, StoreError> {
        Ok(self.issuers.get(did).map(|i| i.value().clone()))
    }

    async fn upsert(&self, mut issuer: Issuer) -> Result<(), StoreError> {
        issuer.updated_at = Utc::now();
        self.issuers.insert(issuer.did.clone(), issuer);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRevocationStore {
    lists: DashMap<String, RevocationList>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn get(&self, list_id: &str) -> Result<Option<RevocationList>, StoreError> {
        Ok(self.lists.get(list_id).map(|l| l.value().clone()))
    }

    async fn put(&self, list: RevocationList) -> Result<(), StoreError> {
        self.lists.insert(list.list_id.clone(), list);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_policy_store_round_trips() {
        let store = MemoryPolicyStore::new();
        let policy = Policy::deny_all();
        store.upsert(policy.clone()).await.unwrap();
        assert_eq!(store.get(&policy.id).await.unwrap().unwrap().id, policy.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_issuer_upsert_touches_updated_at() {
        let registry = MemoryIssuerRegistry::new();
        let old = Utc::now() - chrono::Duration::hours(1);
        registry
            .upsert(Issuer {
                did: "did:key:z6MkTest".into(),
                public_key: "AA".into(),
                enabled: true,
                trust_tier: 3,
                created_at: old,
                updated_at: old,
            })
            .await
            .unwrap();
        let stored = registry.get("did:key:z6MkTest").await.unwrap().unwrap();
        assert!(stored.updated_at > old);
    }
}
