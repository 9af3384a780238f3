use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LayeredCache;
use crate::crypto::redact_did;
use crate::didkey;
use crate::error::GatewayError;
use crate::resilience::{BreakerConfig, BreakerError, BreakerRegistry, RemoteError, RetryPolicy};

/// DID syntax: `did:<method>:<segment>` with additional `:`-separated
/// segments for methods that encode a path (did:web).
static DID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^did:([a-z0-9]+):([A-Za-z0-9._%-]+(?::[A-Za-z0-9._%-]+)*)$")
        .expect("DID regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DidMethod {
    Key,
    Web,
    Ion,
}

impl DidMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidMethod::Key => "key",
            DidMethod::Web => "web",
            DidMethod::Ion => "ion",
        }
    }
}

/// Parsed and method-validated DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Did {
    pub method: DidMethod,
    pub id: String,
}

impl Did {
    pub fn parse(value: &str) -> Result<Self, GatewayError> {
        let caps = DID_RE
            .captures(value)
            .ok_or_else(|| GatewayError::InvalidDidFormat(value.to_string()))?;
        let method = match &caps[1] {
            "key" => DidMethod::Key,
            "web" => DidMethod::Web,
            "ion" => DidMethod::Ion,
            other => return Err(GatewayError::UnsupportedDidMethod(other.to_string())),
        };
        Ok(Did {
            method,
            id: caps[2].to_string(),
        })
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method.as_str(), self.id)
    }
}

// ---------------------------------------------------------------------------
// DID documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(rename = "publicKeyMultibase")]
    pub public_key_multibase: Option<String>,
    #[serde(rename = "publicKeyJwk")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub ion_resolver_url: String,
    pub web_breaker: BreakerConfig,
    pub ion_breaker: BreakerConfig,
    pub web_attempts: u32,
    pub ion_attempts: u32,
    pub retry_initial: Duration,
    pub key_ttl: Duration,
    pub web_ttl: Duration,
    pub ion_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ion_resolver_url: "https://ion.tbddev.org".to_string(),
            web_breaker: BreakerConfig::default(),
            ion_breaker: BreakerConfig {
                reset_timeout: Duration::from_secs(120),
                ..BreakerConfig::default()
            },
            web_attempts: 3,
            ion_attempts: 5,
            retry_initial: Duration::from_millis(500),
            key_ttl: Duration::from_secs(365 * 24 * 3600),
            web_ttl: Duration::from_secs(3600),
            ion_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Resolves a DID to its 32-byte Ed25519 verification key.
///
/// Remote methods (web, ion) go through a per-host circuit breaker and a
/// retry policy; every resolution result is written through the layered
/// cache under `did:<did>` so an open breaker still serves prior successes.
pub struct DidResolver {
    cache: Arc<LayeredCache>,
    http: reqwest::Client,
    web_breakers: BreakerRegistry,
    ion_breakers: BreakerRegistry,
    retry_web: RetryPolicy,
    retry_ion: RetryPolicy,
    config: ResolverConfig,
}

impl DidResolver {
    pub fn new(cache: Arc<LayeredCache>, config: ResolverConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            web_breakers: BreakerRegistry::new(config.web_breaker.clone()),
            ion_breakers: BreakerRegistry::new(config.ion_breaker.clone()),
            retry_web: RetryPolicy::new(config.web_attempts).with_initial(config.retry_initial),
            retry_ion: RetryPolicy::new(config.ion_attempts).with_initial(config.retry_initial),
            cache,
            config,
        }
    }

    pub async fn resolve(&self, did: &Did) -> Result<[u8; 32], GatewayError> {
        let cache_key = format!("did:{did}");
        match self.cache.get(&cache_key).await {
            Ok(Some(bytes)) => {
                if let Ok(pk) = <[u8; 32]>::try_from(bytes.as_slice()) {
                    return Ok(pk);
                }
                tracing::warn!(did = %redact_did(&did.to_string()), "dropping malformed cache entry");
                let _ = self.cache.delete(&cache_key).await;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "resolver cache read failed"),
        }

        metrics::counter!("did_resolutions_total", 1);
        let (pk, ttl) = match did.method {
            DidMethod::Key => {
                let pk = didkey::decode_did_key(&did.to_string())?;
                (pk, self.config.key_ttl)
            }
            DidMethod::Web => {
                let url = web_document_url(&did.id)?;
                let host = did_web_host(&did.id)?;
                let pk = self
                    .fetch_with_breaker(&url, &host, &self.web_breakers, &self.retry_web, false)
                    .await?;
                (pk, self.config.web_ttl)
            }
            DidMethod::Ion => {
                let url = format!(
                    "{}/identifiers/{}",
                    self.config.ion_resolver_url.trim_end_matches('/'),
                    did
                );
                let host = self.config.ion_resolver_url.clone();
                let pk = self
                    .fetch_with_breaker(&url, &host, &self.ion_breakers, &self.retry_ion, true)
                    .await?;
                (pk, self.config.ion_ttl)
            }
        };

        if let Err(e) = self.cache.set(&cache_key, &pk, ttl).await {
            tracing::warn!(error = %e, "resolver cache write failed");
        }
        Ok(pk)
    }

    async fn fetch_with_breaker(
        &self,
        url: &str,
        host: &str,
        breakers: &BreakerRegistry,
        retry: &RetryPolicy,
        enveloped: bool,
    ) -> Result<[u8; 32], GatewayError> {
        let breaker = breakers.get_or_create(host);
        let result = breaker
            .call(|| retry.run(|| self.fetch_key(url, enveloped)))
            .await;

        match result {
            Ok(pk) => Ok(pk),
            Err(BreakerError::Open) => Err(GatewayError::CircuitOpen),
            Err(BreakerError::Timeout) => {
                Err(GatewayError::DidResolutionFailed("resolver call timed out".into()))
            }
            Err(BreakerError::Inner(msg)) => Err(GatewayError::DidResolutionFailed(msg)),
        }
    }

    async fn fetch_key(&self, url: &str, enveloped: bool) -> Result<[u8; 32], RemoteError<String>> {
        let response = self.http.get(url).send().await.map_err(|e| {
            // Transport failures (refused, DNS, timeout) are worth retrying.
            RemoteError::Retryable(format!("http error: {e}"))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RemoteError::Retryable(format!("resolver returned {status}")));
        }
        if !status.is_success() {
            return Err(RemoteError::NonRetryable(format!("resolver returned {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RemoteError::NonRetryable(format!("invalid resolver body: {e}")))?;

        // ION resolvers wrap the document in a resolution envelope.
        let doc_value = if enveloped {
            body.get("didDocument").cloned().unwrap_or(body)
        } else {
            body
        };
        let doc: DidDocument = serde_json::from_value(doc_value)
            .map_err(|e| RemoteError::NonRetryable(format!("invalid DID document: {e}")))?;

        extract_verification_key(&doc).map_err(RemoteError::NonRetryable)
    }
}

/// Pull the Ed25519 key out of a DID document. Strict: the first
/// verification method decides, and its key must decode to 32 bytes.
pub fn extract_verification_key(doc: &DidDocument) -> Result<[u8; 32], String> {
    let vm = doc
        .verification_method
        .first()
        .ok_or_else(|| "document has no verification method".to_string())?;

    let is_ed25519 = match vm.key_type.as_str() {
        "Ed25519VerificationKey2020" | "Ed25519VerificationKey2018" => true,
        _ => vm
            .public_key_jwk
            .as_ref()
            .map(|jwk| jwk.kty == "OKP" && jwk.crv == "Ed25519")
            .unwrap_or(false),
    };
    if !is_ed25519 {
        return Err(format!("unsupported verification key type: {}", vm.key_type));
    }

    if let Some(jwk) = &vm.public_key_jwk {
        let bytes = crate::didkey::decode_key_b64(&jwk.x)
            .map_err(|e| format!("bad publicKeyJwk.x: {e}"))?;
        return Ok(bytes);
    }
    if let Some(mb) = &vm.public_key_multibase {
        let (_, bytes) =
            multibase::decode(mb).map_err(|e| format!("bad publicKeyMultibase: {e}"))?;
        return didkey::multicodec_ed25519(&bytes).map_err(|e| e.to_string());
    }
    Err("verification method has no public key material".to_string())
}

/// Build the document URL for a did:web id. Segments are `:`-separated and
/// percent-decoded (`%3A` carries a port). No path means `/.well-known/`.
pub fn web_document_url(id: &str) -> Result<String, GatewayError> {
    let mut segments = Vec::new();
    for raw in id.split(':') {
        let decoded = urlencoding::decode(raw)
            .map_err(|e| GatewayError::InvalidDidFormat(format!("bad did:web encoding: {e}")))?;
        segments.push(decoded.into_owned());
    }
    let host = &segments[0];
    if segments.len() == 1 {
        Ok(format!("https://{host}/.well-known/did.json"))
    } else {
        Ok(format!("https://{}/{}/did.json", host, segments[1..].join("/")))
    }
}

fn did_web_host(id: &str) -> Result<String, GatewayError> {
    let raw = id.split(':').next().unwrap_or(id);
    let decoded = urlencoding::decode(raw)
        .map_err(|e| GatewayError::InvalidDidFormat(format!("bad did:web encoding: {e}")))?;
    Ok(decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};

    #[test]
    fn parses_supported_dids() {
        let did = Did::parse("did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK").unwrap();
        assert_eq!(did.method, DidMethod::Key);

        let web = Did::parse("did:web:example.com:users:alice").unwrap();
        assert_eq!(web.method, DidMethod::Web);
        assert_eq!(web.id, "example.com:users:alice");

        let ion = Did::parse("did:ion:EiClkZMDxPKqC9c-umQfTkR8").unwrap();
        assert_eq!(ion.method, DidMethod::Ion);
    }

    #[test]
    fn rejects_malformed_and_unsupported() {
        assert!(matches!(
            Did::parse("not-a-did"),
            Err(GatewayError::InvalidDidFormat(_))
        ));
        assert!(matches!(
            Did::parse("did:KEY:abc"),
            Err(GatewayError::InvalidDidFormat(_))
        ));
        assert!(matches!(
            Did::parse("did:plc:abcdef"),
            Err(GatewayError::UnsupportedDidMethod(_))
        ));
        assert!(matches!(
            Did::parse("did:web:"),
            Err(GatewayError::InvalidDidFormat(_))
        ));
    }

    #[test]
    fn web_urls_cover_well_known_port_and_path() {
        assert_eq!(
            web_document_url("example.com").unwrap(),
            "https://example.com/.well-known/did.json"
        );
        assert_eq!(
            web_document_url("example.com:users:alice").unwrap(),
            "https://example.com/users/alice/did.json"
        );
        assert_eq!(
            web_document_url("example.com%3A8443").unwrap(),
            "https://example.com:8443/.well-known/did.json"
        );
    }

    fn doc(key_type: &str, jwk: Option<PublicKeyJwk>, mb: Option<String>) -> DidDocument {
        DidDocument {
            id: "did:web:example.com".into(),
            verification_method: vec![VerificationMethod {
                id: "did:web:example.com#key-1".into(),
                key_type: key_type.into(),
                controller: None,
                public_key_multibase: mb,
                public_key_jwk: jwk,
            }],
        }
    }

    #[test]
    fn extracts_jwk_and_multibase_keys() {
        let pk = [7u8; 32];
        let jwk_doc = doc(
            "Ed25519VerificationKey2020",
            Some(PublicKeyJwk {
                kty: "OKP".into(),
                crv: "Ed25519".into(),
                x: crate::didkey::encode_key_b64(&pk),
            }),
            None,
        );
        assert_eq!(extract_verification_key(&jwk_doc).unwrap(), pk);

        let mut mb_bytes = vec![0xed, 0x01];
        mb_bytes.extend_from_slice(&pk);
        let mb_doc = doc(
            "Ed25519VerificationKey2020",
            None,
            Some(multibase::encode(multibase::Base::Base58Btc, mb_bytes)),
        );
        assert_eq!(extract_verification_key(&mb_doc).unwrap(), pk);
    }

    #[test]
    fn rejects_foreign_first_key_and_bad_length() {
        let p256_doc = doc(
            "EcdsaSecp256k1VerificationKey2019",
            Some(PublicKeyJwk {
                kty: "EC".into(),
                crv: "secp256k1".into(),
                x: "AA".into(),
            }),
            None,
        );
        assert!(extract_verification_key(&p256_doc).is_err());

        let short_doc = doc(
            "Ed25519VerificationKey2020",
            None,
            Some(multibase::encode(
                multibase::Base::Base58Btc,
                vec![0xed, 0x01, 0x00, 0x01],
            )),
        );
        assert!(extract_verification_key(&short_doc).is_err());
    }

    #[tokio::test]
    async fn resolves_did_key_locally_and_caches() {
        let kv = Arc::new(MemoryKv::new());
        let cache = Arc::new(LayeredCache::new(kv.clone()));
        let resolver = DidResolver::new(cache, ResolverConfig::default());

        let pk = [9u8; 32];
        let did = Did::parse(&crate::didkey::encode_did_key(&pk)).unwrap();
        assert_eq!(resolver.resolve(&did).await.unwrap(), pk);

        // Second resolve is served from cache; the KV holds the raw key.
        assert_eq!(resolver.resolve(&did).await.unwrap(), pk);
        let cached = kv.get(&format!("did:{did}")).await.unwrap().unwrap();
        assert_eq!(cached, pk.to_vec());
    }
}
