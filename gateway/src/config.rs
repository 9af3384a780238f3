use anyhow::{bail, Context, Result};
use std::net::SocketAddr;

use crate::token::TokenKey;

/// Operator-facing configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub postgres_dsn: String,
    /// Absent means the in-memory KV: fine for a single replica or tests,
    /// no cross-replica challenge/rate-limit sharing.
    pub redis_addr: Option<String>,
    pub upstream_url: String,
    pub token_issuer: String,
    pub token_keys: Vec<TokenKey>,
    pub admin_token: String,
    pub challenge_audience: String,
    pub challenge_domain: String,
    pub ion_resolver_url: String,
    pub otlp_endpoint: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("GATEWAY_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("GATEWAY_ADDR is not a socket address")?;

        let postgres_dsn = std::env::var("POSTGRES_DSN").context("POSTGRES_DSN is required")?;
        let redis_addr = std::env::var("REDIS_ADDR").ok();
        let upstream_url = std::env::var("UPSTREAM_URL").context("UPSTREAM_URL is required")?;
        url::Url::parse(&upstream_url).context("UPSTREAM_URL is not a valid URL")?;

        let token_issuer =
            std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "vouch-gateway".to_string());
        let token_secret = std::env::var("TOKEN_SECRET").context("TOKEN_SECRET is required")?;
        let token_keys = parse_token_keys(&token_secret)?;

        let admin_token = std::env::var("ADMIN_TOKEN").context("ADMIN_TOKEN is required")?;

        let challenge_audience =
            std::env::var("CHALLENGE_AUDIENCE").unwrap_or_else(|_| token_issuer.clone());
        let challenge_domain = std::env::var("CHALLENGE_DOMAIN")
            .unwrap_or_else(|_| "gateway.local".to_string());

        let ion_resolver_url = std::env::var("ION_RESOLVER_URL")
            .unwrap_or_else(|_| "https://ion.tbddev.org".to_string());

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

        Ok(Self {
            listen_addr,
            postgres_dsn,
            redis_addr,
            upstream_url,
            token_issuer,
            token_keys,
            admin_token,
            challenge_audience,
            challenge_domain,
            ion_resolver_url,
            otlp_endpoint,
        })
    }
}

/// `TOKEN_SECRET` is either a bare secret (kid `primary`) or a JSON array of
/// `{kid, secret}`, first entry active, the rest legacy verifiers.
pub fn parse_token_keys(raw: &str) -> Result<Vec<TokenKey>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("TOKEN_SECRET is empty");
    }

    if trimmed.starts_with('[') {
        let keys: Vec<TokenKey> =
            serde_json::from_str(trimmed).context("TOKEN_SECRET is not a valid key list")?;
        if keys.is_empty() {
            bail!("TOKEN_SECRET key list is empty");
        }
        if keys.iter().any(|k| k.kid.is_empty() || k.secret.is_empty()) {
            bail!("TOKEN_SECRET entries need non-empty kid and secret");
        }
        return Ok(keys);
    }

    Ok(vec![TokenKey {
        kid: "primary".to_string(),
        secret: trimmed.to_string(),
    }])
}
