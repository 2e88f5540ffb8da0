//! The network seam between a VASP and its counterparties.
//!
//! A [`CounterpartyTransport`] moves bytes; it never interprets UMA messages.
//! Bodies come back raw so the codec parses them strictly, and a counterparty
//! that answered with a UMA error body surfaces as [`TransportError::Rejected`]
//! carrying the remote reason code.

use std::fmt::Debug;

use url::Url;

use crate::error::{FailureReason, UmaError};
use crate::keys::PubKeyResponse;

/// Failure exchanging a message with a counterparty.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The counterparty did not answer in time.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The counterparty rejected the message with a UMA error.
    #[error("counterparty rejected request: {0}")]
    Rejected(UmaError),
    /// The counterparty answered with an unexpected status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Network(String),
    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Maps the failure onto the handshake taxonomy.
    ///
    /// `fallback` is the reason used for generic failures of this step.
    #[must_use]
    pub fn into_uma_error(self, fallback: FailureReason) -> UmaError {
        match self {
            Self::Rejected(err) => err,
            Self::Timeout(msg) => UmaError::new(FailureReason::Timeout, msg),
            Self::InvalidResponse(msg) => UmaError::new(FailureReason::MalformedMessage, msg),
            other @ (Self::Status { .. } | Self::Network(_)) => {
                UmaError::new(fallback, other.to_string())
            }
        }
    }
}

/// Outbound HTTP exchanges of the handshake.
#[async_trait::async_trait]
pub trait CounterpartyTransport: Send + Sync + Debug {
    /// Fetches `/.well-known/lnurlpubkey` from `vasp_domain`.
    async fn fetch_public_keys(&self, vasp_domain: &str) -> Result<PubKeyResponse, TransportError>;

    /// Sends a signed LNURLp request and returns the raw response body.
    async fn send_lnurlp_request(&self, url: &Url) -> Result<Vec<u8>, TransportError>;

    /// Posts a PayRequest body to `callback` and returns the raw response body.
    async fn send_pay_request(&self, callback: &Url, body: Vec<u8>)
    -> Result<Vec<u8>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejections_keep_their_reason() {
        let remote = UmaError::new(FailureReason::ComplianceRejected, "vetoed");
        let mapped = TransportError::Rejected(remote.clone()).into_uma_error(FailureReason::RequestFailed);
        assert_eq!(mapped, remote);
    }

    #[test]
    fn generic_failures_use_the_step_fallback() {
        let mapped = TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into_uma_error(FailureReason::KeyDiscoveryFailed);
        assert_eq!(mapped.reason(), FailureReason::KeyDiscoveryFailed);

        let mapped = TransportError::Timeout("slow".into()).into_uma_error(FailureReason::RequestFailed);
        assert_eq!(mapped.reason(), FailureReason::Timeout);
    }
}
