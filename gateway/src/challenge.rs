use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{redact_did, redact_nonce};
use crate::error::GatewayError;
use crate::kv::KvStore;
use crate::resolver::Did;

pub const DEFAULT_CHALLENGE_LIFETIME: Duration = Duration::from_secs(120);

const NONCE_LEN: usize = 16;

fn challenge_key(nonce: &str) -> String {
    format!("chal:{nonce}")
}

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    pub audience: String,
    pub domain: String,
    pub lifetime: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChallenge {
    did: String,
    challenge: String,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge: String,
    pub nonce: String,
    pub expires_at: i64,
    pub audience: String,
    pub domain: String,
}

/// Mints single-use challenges and consumes them on verification.
///
/// Single-use holds under concurrency because consumption is one atomic
/// [`KvStore::pop`]: of N parallel verifies presenting the same nonce,
/// exactly one observes the stored value.
pub struct ChallengeService {
    kv: Arc<dyn KvStore>,
    config: ChallengeConfig,
}

impl ChallengeService {
    pub fn new(kv: Arc<dyn KvStore>, config: ChallengeConfig) -> Self {
        Self { kv, config }
    }

    pub async fn issue(&self, did: &Did) -> Result<IssuedChallenge, GatewayError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = URL_SAFE_NO_PAD.encode(nonce_bytes);

        let exp = Utc::now().timestamp() + self.config.lifetime.as_secs() as i64;
        let challenge = format!(
            "did={did}\nnonce={nonce}\naud={aud}\ndomain={domain}\nexp={exp}\n",
            aud = self.config.audience,
            domain = self.config.domain,
        );

        let stored = StoredChallenge {
            did: did.to_string(),
            challenge: challenge.clone(),
            exp,
        };
        let value = serde_json::to_vec(&stored)
            .map_err(|e| GatewayError::Internal(format!("challenge encoding: {e}")))?;
        self.kv
            .set_with_ttl(&challenge_key(&nonce), &value, self.config.lifetime)
            .await?;

        tracing::debug!(
            did = %redact_did(&stored.did),
            nonce = %redact_nonce(&nonce),
            "challenge issued"
        );

        Ok(IssuedChallenge {
            challenge,
            nonce,
            expires_at: exp,
            audience: self.config.audience.clone(),
            domain: self.config.domain.clone(),
        })
    }

    /// Consume a challenge. The pop deletes the nonce whether or not the
    /// subsequent checks pass, so a failed verify also burns it.
    pub async fn consume(
        &self,
        nonce: &str,
        did: &str,
        presented_challenge: &str,
    ) -> Result<(), GatewayError> {
        let raw = self
            .kv
            .pop(&challenge_key(nonce))
            .await?
            .ok_or(GatewayError::NonceUnknownOrReused)?;
        let stored: StoredChallenge = serde_json::from_slice(&raw)
            .map_err(|e| GatewayError::Internal(format!("challenge decoding: {e}")))?;

        if stored.did != did {
            return Err(GatewayError::ChallengeSubjectMismatch);
        }
        if stored.challenge != presented_challenge {
            return Err(GatewayError::ChallengeSubjectMismatch);
        }
        if Utc::now().timestamp() >= stored.exp {
            return Err(GatewayError::ChallengeExpired);
        }
        Ok(())
    }
}

/// Extract the nonce from a presented canonical challenge string.
pub fn parse_nonce(challenge: &str) -> Result<&str, GatewayError> {
    challenge
        .lines()
        .find_map(|line| line.strip_prefix("nonce="))
        .filter(|nonce| !nonce.is_empty())
        .ok_or_else(|| GatewayError::MalformedRequest("challenge has no nonce line".into()))
}
