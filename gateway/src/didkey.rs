use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use multibase::Base;

use crate::error::GatewayError;

/// Multicodec prefix for an Ed25519 public key (0xed varint-encoded).
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

pub const ED25519_KEY_LEN: usize = 32;

/// Encode a raw Ed25519 verification key as a `did:key` identifier:
/// `did:key:z` + base58btc(0xed 0x01 || key).
pub fn encode_did_key(public_key: &[u8; ED25519_KEY_LEN]) -> String {
    let mut bytes = Vec::with_capacity(ED25519_MULTICODEC.len() + ED25519_KEY_LEN);
    bytes.extend_from_slice(&ED25519_MULTICODEC);
    bytes.extend_from_slice(public_key);
    format!("did:key:{}", multibase::encode(Base::Base58Btc, bytes))
}

/// Decode a `did:key` identifier back to the raw 32-byte key.
pub fn decode_did_key(did: &str) -> Result<[u8; ED25519_KEY_LEN], GatewayError> {
    let encoded = did
        .strip_prefix("did:key:")
        .ok_or_else(|| GatewayError::InvalidDidFormat(format!("not a did:key: {did}")))?;

    let (base, bytes) = multibase::decode(encoded)
        .map_err(|e| GatewayError::InvalidDidFormat(format!("bad multibase: {e}")))?;
    if base != Base::Base58Btc {
        return Err(GatewayError::InvalidDidFormat(
            "did:key must be base58btc (z prefix)".into(),
        ));
    }

    multicodec_ed25519(&bytes)
}

/// Strip the Ed25519 multicodec prefix and enforce the 32-byte length.
/// Also accepts a bare 32-byte key, which some DID documents publish in
/// `publicKeyMultibase` without the codec prefix.
pub fn multicodec_ed25519(bytes: &[u8]) -> Result<[u8; ED25519_KEY_LEN], GatewayError> {
    let raw = match bytes {
        [0xed, 0x01, rest @ ..] => rest,
        other => other,
    };
    let key: [u8; ED25519_KEY_LEN] = raw.try_into().map_err(|_| {
        GatewayError::InvalidDidFormat(format!("ed25519 key must be 32 bytes, got {}", raw.len()))
    })?;
    Ok(key)
}

/// Unpadded base64url helpers for persisted public keys.
pub fn encode_key_b64(public_key: &[u8; ED25519_KEY_LEN]) -> String {
    URL_SAFE_NO_PAD.encode(public_key)
}

pub fn decode_key_b64(encoded: &str) -> Result<[u8; ED25519_KEY_LEN], GatewayError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| GatewayError::InvalidDidFormat(format!("bad base64url key: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        GatewayError::InvalidDidFormat(format!("ed25519 key must be 32 bytes, got {}", bytes.len()))
    })
}
