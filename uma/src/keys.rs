//! VASP key material, message signing and verification.
//!
//! Signatures are ECDSA over secp256k1 of `SHA-256(payload)`, encoded as the
//! 64-byte compact `r || s` form in lowercase hex. Public keys travel as SEC1
//! hex (compressed or uncompressed) inside a [`PubKeyResponse`].
//!
//! Verification fails closed: any hex, length, key or signature decoding error
//! reads as an invalid signature.

use std::fmt;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;

/// Errors produced while loading key material.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The key is not valid hex.
    #[error("key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The bytes do not form a valid secp256k1 key.
    #[error("invalid secp256k1 key: {0}")]
    Curve(#[from] k256::ecdsa::Error),
}

/// A VASP's private signing key.
///
/// The secret never appears in `Debug` output.
#[derive(Clone)]
pub struct VaspSigningKey {
    key: SigningKey,
}

impl fmt::Debug for VaspSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaspSigningKey")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl VaspSigningKey {
    /// Loads a 32-byte private key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Curve`] if the scalar is zero or out of range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            key: SigningKey::from_slice(bytes)?,
        })
    }

    /// Loads a private key from hex, with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the hex or the scalar is invalid.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        Self::from_bytes(&bytes)
    }

    /// Signs a canonical payload and returns the hex compact signature.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        let signature: Signature = self.key.sign(payload);
        hex::encode(signature.to_bytes())
    }

    /// Returns the compressed SEC1 public key as hex.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_sec1_bytes())
    }
}

/// Parses a SEC1 hex public key.
///
/// # Errors
///
/// Returns [`KeyError`] if the hex or the curve point is invalid.
pub fn parse_public_key(s: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(s.trim())?;
    Ok(VerifyingKey::from_sec1_bytes(&bytes)?)
}

/// Verifies a hex compact signature over `payload`.
///
/// Returns `false` for any malformed signature instead of an error.
#[must_use]
pub fn verify_signature(payload: &[u8], signature_hex: &str, public_key: &VerifyingKey) -> bool {
    let Ok(bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    public_key.verify(payload, &signature).is_ok()
}

/// Generates a fresh random nonce for a signed message.
#[must_use]
pub fn generate_nonce() -> String {
    let nonce: u64 = rng().random();
    nonce.to_string()
}

/// Public key bundle a VASP publishes at `/.well-known/lnurlpubkey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubKeyResponse {
    /// SEC1 hex key used to verify this VASP's signatures.
    pub signing_pub_key: String,
    /// SEC1 hex key counterparties use to encrypt travel-rule data.
    pub encryption_pub_key: String,
    /// Time after which the keys must be re-fetched; cacheable forever if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<UnixTimestamp>,
}

impl PubKeyResponse {
    /// Creates a bundle that never expires.
    #[must_use]
    pub fn new(signing_pub_key: impl Into<String>, encryption_pub_key: impl Into<String>) -> Self {
        Self {
            signing_pub_key: signing_pub_key.into(),
            encryption_pub_key: encryption_pub_key.into(),
            expiration_timestamp: None,
        }
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: UnixTimestamp) -> Self {
        self.expiration_timestamp = Some(expiration);
        self
    }

    /// Whether the bundle may still be trusted at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: UnixTimestamp) -> bool {
        self.expiration_timestamp.is_none_or(|exp| exp >= now)
    }

    /// Parses the signing key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the published key is not a valid SEC1 point.
    pub fn signing_key(&self) -> Result<VerifyingKey, KeyError> {
        parse_public_key(&self.signing_pub_key)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_key(seed: u8) -> VaspSigningKey {
        VaspSigningKey::from_bytes(&[seed; 32]).unwrap()
    }

    #[test]
    fn sign_then_verify() {
        let key = test_key(0x11);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let payload = b"$bob@receive.example.com|12345|1700000000";
        let signature = key.sign(payload);
        assert_eq!(signature.len(), 128);
        assert!(verify_signature(payload, &signature, &public));
        assert!(verify_signature(payload, &signature.to_uppercase(), &public));
    }

    #[test]
    fn flipping_any_payload_byte_breaks_the_signature() {
        let key = test_key(0x22);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let payload = b"$alice@pay.example.com|987|1700000001".to_vec();
        let signature = key.sign(&payload);
        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert!(!verify_signature(&tampered, &signature, &public), "byte {i}");
        }
    }

    #[test]
    fn flipping_any_signature_byte_breaks_the_signature() {
        let key = test_key(0x33);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let payload = b"payload";
        let mut raw = hex::decode(key.sign(payload)).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x80;
            assert!(!verify_signature(payload, &hex::encode(&raw), &public), "byte {i}");
            raw[i] ^= 0x80;
        }
    }

    #[test]
    fn wrong_key_and_garbage_fail_closed() {
        let signer = test_key(0x44);
        let other = parse_public_key(&test_key(0x55).public_key_hex()).unwrap();
        let payload = b"payload";
        assert!(!verify_signature(payload, &signer.sign(payload), &other));
        assert!(!verify_signature(payload, "not-hex", &other));
        assert!(!verify_signature(payload, "abcd", &other));
        assert!(!verify_signature(payload, "", &other));
    }

    #[test]
    fn key_loading_accepts_prefixed_hex() {
        let hex_key = format!("0x{}", "11".repeat(32));
        let key = VaspSigningKey::from_hex(&hex_key).unwrap();
        assert_eq!(key.public_key_hex(), test_key(0x11).public_key_hex());
        assert!(VaspSigningKey::from_hex("zz").is_err());
        assert!(VaspSigningKey::from_bytes(&[0; 32]).is_err());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let debug = format!("{:?}", test_key(0x11));
        assert!(!debug.contains(&"11".repeat(32)));
    }

    #[test]
    fn bundle_expiry_is_inclusive() {
        let bundle = PubKeyResponse::new("aa", "bb").with_expiration(UnixTimestamp::from_secs(100));
        assert!(bundle.is_valid_at(UnixTimestamp::from_secs(100)));
        assert!(!bundle.is_valid_at(UnixTimestamp::from_secs(101)));
        assert!(PubKeyResponse::new("aa", "bb").is_valid_at(UnixTimestamp::from_secs(u64::MAX)));
    }

    #[test]
    fn nonces_are_fresh() {
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
