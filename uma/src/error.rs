//! Failure taxonomy for the UMA handshake.
//!
//! Every step of the handshake reports failures as an [`UmaError`]: a
//! machine-readable [`FailureReason`], the wire field that caused it (when one
//! did) and a human-readable message. The same value is serialized as the JSON
//! error body a VASP returns to its counterparty, so a remote rejection
//! surfaces on the other side with its original reason code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable reason codes for handshake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureReason {
    /// Structural or schema failure, rejected before any cryptography.
    MalformedMessage,
    /// Signature verification failed after the key-rotation retry.
    SignatureInvalid,
    /// The message nonce was already seen.
    NonceReplay,
    /// The counterparty public key could not be obtained.
    KeyDiscoveryFailed,
    /// A compliance policy decision denied the transaction.
    ComplianceRejected,
    /// The amount lies outside the currency's sendable bounds.
    CurrencyOutOfRange,
    /// A counterparty round trip exceeded its deadline.
    Timeout,
    /// The invoice is no longer payable.
    InvoiceExpired,
    /// The counterparty speaks no protocol version we support.
    UnsupportedVersion,
    /// The currency is not offered by the receiver.
    UnsupportedCurrency,
    /// The addressed user does not exist.
    UserNotFound,
    /// The counterparty could not be reached or answered with a non-UMA error.
    RequestFailed,
    /// The caller cancelled the handshake.
    Cancelled,
    /// The handshake was driven out of order.
    InvalidState,
    /// An injected capability failed.
    Internal,
}

impl FailureReason {
    /// Returns the `snake_case` string representation matching the wire format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::SignatureInvalid => "signature_invalid",
            Self::NonceReplay => "nonce_replay",
            Self::KeyDiscoveryFailed => "key_discovery_failed",
            Self::ComplianceRejected => "compliance_rejected",
            Self::CurrencyOutOfRange => "currency_out_of_range",
            Self::Timeout => "timeout",
            Self::InvoiceExpired => "invoice_expired",
            Self::UnsupportedVersion => "unsupported_version",
            Self::UnsupportedCurrency => "unsupported_currency",
            Self::UserNotFound => "user_not_found",
            Self::RequestFailed => "request_failed",
            Self::Cancelled => "cancelled",
            Self::InvalidState => "invalid_state",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may retry the whole handshake with backoff.
    ///
    /// Only transient conditions qualify. The core itself never retries beyond
    /// the single key-rotation attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::KeyDiscoveryFailed | Self::Timeout | Self::RequestFailed
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handshake failure with its reason code and offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}{}: {message}", field_suffix(.field))]
pub struct UmaError {
    reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    message: String,
}

impl UmaError {
    /// Creates an error with the given reason and message.
    #[must_use]
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            field: None,
            message: message.into(),
        }
    }

    /// Shorthand for a [`FailureReason::MalformedMessage`] naming `field`.
    #[must_use]
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureReason::MalformedMessage, message).with_field(field)
    }

    /// Sets the offending wire field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Returns the reason code.
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        self.reason
    }

    /// Returns the offending field, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Builds the JSON error body sent to a counterparty.
    #[must_use]
    pub fn to_response_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "status": "ERROR",
            "reason": self.reason,
            "message": self.message,
        });
        if let Some(field) = &self.field {
            body["field"] = serde_json::Value::String(field.clone());
        }
        body
    }

    /// Parses a counterparty error body produced by [`Self::to_response_body`].
    ///
    /// Returns `None` when the body is not a UMA error.
    #[must_use]
    pub fn from_response_body(body: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct ErrorBody {
            status: String,
            #[serde(flatten)]
            error: UmaError,
        }
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        (parsed.status == "ERROR").then_some(parsed.error)
    }
}

#[allow(clippy::ref_option)]
fn field_suffix(field: &Option<String>) -> String {
    field
        .as_deref()
        .map(|f| format!(" ({f})"))
        .unwrap_or_default()
}

impl From<serde_json::Error> for UmaError {
    fn from(value: serde_json::Error) -> Self {
        Self::new(FailureReason::MalformedMessage, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_serializes_as_snake_case() {
        let json = serde_json::to_string(&FailureReason::ComplianceRejected).unwrap();
        assert_eq!(json, "\"compliance_rejected\"");
        assert_eq!(FailureReason::NonceReplay.to_string(), "nonce_replay");
    }

    #[test]
    fn response_body_round_trips_reason_and_field() {
        let err = UmaError::malformed("payerData.identifier", "invalid uma address");
        let body = err.to_response_body().to_string();
        let decoded = UmaError::from_response_body(&body).unwrap();
        assert_eq!(decoded, err);
        assert_eq!(decoded.field(), Some("payerData.identifier"));
    }

    #[test]
    fn display_names_the_field_when_there_is_one() {
        let err = UmaError::malformed("nonce", "missing nonce");
        assert_eq!(err.to_string(), "malformed_message (nonce): missing nonce");
        let err = UmaError::new(FailureReason::Timeout, "too slow");
        assert_eq!(err.to_string(), "timeout: too slow");
    }

    #[test]
    fn non_uma_body_is_not_an_error() {
        assert!(UmaError::from_response_body("<html>502</html>").is_none());
        assert!(UmaError::from_response_body(r#"{"status":"OK"}"#).is_none());
    }

    #[test]
    fn only_transient_reasons_are_retryable() {
        assert!(FailureReason::Timeout.is_retryable());
        assert!(FailureReason::KeyDiscoveryFailed.is_retryable());
        assert!(!FailureReason::SignatureInvalid.is_retryable());
        assert!(!FailureReason::ComplianceRejected.is_retryable());
    }
}
