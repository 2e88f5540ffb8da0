//! Verification of Lightning node operator webhooks.
//!
//! Webhook bodies are authenticated with HMAC-SHA256 over the raw bytes,
//! keyed with the shared webhook secret and sent hex-encoded in the
//! [`WEBHOOK_SIGNATURE_HEADER`] header. A digest that is not valid hex, has
//! the wrong length or does not match is rejected; there is no unsigned
//! fallback.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 digest of the body.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "lightspark-signature";

/// Webhook verification failure.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The digest does not authenticate the body.
    #[error("webhook message hash does not match signature")]
    SignatureMismatch,
    /// The body is not a webhook event.
    #[error("invalid webhook body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Kind of a webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    /// A node changed status.
    NodeStatus,
    /// A payment reached a final state.
    PaymentFinished,
    /// A remote signing request.
    RemoteSigning,
    /// An event type this crate does not know yet.
    Other(String),
}

impl WebhookEventType {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeStatus => "NODE_STATUS",
            Self::PaymentFinished => "PAYMENT_FINISHED",
            Self::RemoteSigning => "REMOTE_SIGNING",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for WebhookEventType {
    fn from(s: &str) -> Self {
        match s {
            "NODE_STATUS" => Self::NodeStatus,
            "PAYMENT_FINISHED" => Self::PaymentFinished,
            "REMOTE_SIGNING" => Self::RemoteSigning,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WebhookEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WebhookEventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// A verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Kind of event.
    pub event_type: WebhookEventType,
    /// Unique event id.
    pub event_id: String,
    /// RFC 3339 time the event was emitted.
    pub timestamp: String,
    /// Id of the entity the event is about.
    pub entity_id: String,
    /// Wallet the event concerns, for wallet-scoped events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// Checks `hex_digest` against the HMAC-SHA256 of `body` under `secret`.
///
/// The comparison runs in constant time and ignores hex letter case.
///
/// # Errors
///
/// Returns [`WebhookError::SignatureMismatch`] if the digest is malformed or
/// does not match.
pub fn verify_webhook_signature(
    body: &[u8],
    hex_digest: &str,
    secret: &str,
) -> Result<(), WebhookError> {
    let digest = hex::decode(hex_digest.trim()).map_err(|_| WebhookError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SignatureMismatch)?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| WebhookError::SignatureMismatch)
}

/// Verifies `body` and parses it as a [`WebhookEvent`].
///
/// # Errors
///
/// Returns [`WebhookError::SignatureMismatch`] before looking at the body if
/// the digest does not authenticate it, or [`WebhookError::InvalidBody`].
pub fn verify_and_parse_webhook(
    body: &[u8],
    hex_digest: &str,
    secret: &str,
) -> Result<WebhookEvent, WebhookError> {
    verify_webhook_signature(body, hex_digest, secret)?;
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"event_type": "NODE_STATUS", "event_id": "1615c8be5aa44e429eba700db2ed8ca5", "timestamp": "2023-05-17T23:56:47.874449+00:00", "entity_id": "lightning_node:01882c25-157a-f96b-0000-362d42b64397"}"#;
    const DIGEST: &str = "62a8829aeb48b4142533520b1f7f86cdb1ee7d718bf3ea15bc1c662d4c453b74";
    const SECRET: &str = "3gZ5oQQUASYmqQNuEk0KambNMVkOADDItIJjzUlAWjX";

    #[test]
    fn verifies_and_parses_a_signed_event() {
        let event = verify_and_parse_webhook(BODY.as_bytes(), DIGEST, SECRET).unwrap();
        assert_eq!(event.event_type, WebhookEventType::NodeStatus);
        assert_eq!(event.event_id, "1615c8be5aa44e429eba700db2ed8ca5");
        assert_eq!(
            event.entity_id,
            "lightning_node:01882c25-157a-f96b-0000-362d42b64397"
        );
        assert_eq!(event.wallet_id, None);
    }

    #[test]
    fn digest_comparison_ignores_case() {
        let upper = DIGEST.to_uppercase();
        assert!(verify_webhook_signature(BODY.as_bytes(), &upper, SECRET).is_ok());
    }

    #[test]
    fn bad_digests_are_rejected() {
        let extra = format!("{DIGEST}qq");
        let flipped = format!("{}0", &DIGEST[..63]);
        let wrong = "a".repeat(64);
        for digest in ["deadbeef", wrong.as_str(), "NotAHexValue", extra.as_str(), flipped.as_str()] {
            let err = verify_and_parse_webhook(BODY.as_bytes(), digest, SECRET).unwrap_err();
            assert!(matches!(err, WebhookError::SignatureMismatch), "{digest}");
        }
    }

    #[test]
    fn unknown_event_types_are_kept() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event_type":"WALLET_STATUS","event_id":"e","timestamp":"t","entity_id":"x","wallet_id":"w"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, WebhookEventType::Other("WALLET_STATUS".into()));
        assert_eq!(event.wallet_id.as_deref(), Some("w"));
    }
}
