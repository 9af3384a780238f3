use sha2::{Digest, Sha256};

fn digest_tag(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

/// Tag a DID for logs. The method is not sensitive and stays readable; the
/// method-specific id is replaced with a short digest so the same principal
/// can be correlated across log lines without being identified.
///
/// `did:web:example.com` -> `did:web:#1f7a9c04`
pub fn redact_did(did: &str) -> String {
    let mut parts = did.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("did"), Some(method), Some(id)) => format!("did:{method}:#{}", digest_tag(id)),
        _ => format!("#{}", digest_tag(did)),
    }
}

/// Tag a nonce (or any single-use secret) for log correlation. Never log
/// nonces verbatim; an unconsumed one is a live credential.
pub fn redact_nonce(value: &str) -> String {
    format!("nonce#{}", digest_tag(value))
}
