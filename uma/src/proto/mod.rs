//! Wire format types for the four UMA handshake messages.
//!
//! Each message carries a canonical signable payload: selected fields joined
//! with `|`, timestamps as base-10 Unix seconds, no whitespace. Verification
//! always recomputes the payload from the parsed fields, so the signed bytes
//! never depend on JSON formatting.
//!
//! | Message          | Canonical payload |
//! |------------------|-------------------|
//! | `LnurlpRequest`  | `receiverAddress\|nonce\|timestamp` |
//! | `LnurlpResponse` | `receiverIdentifier\|signatureNonce\|signatureTimestamp` |
//! | `PayRequest`     | `identifier\|signatureNonce\|signatureTimestamp` |
//! | `PayReqResponse` | `payeeIdentifier\|signatureNonce\|signatureTimestamp\|pr` |
//! | `PostTransactionCallback` | `vaspDomain\|signatureNonce\|signatureTimestamp` |
//!
//! Parsing is strict: missing or mistyped required fields, empty nonces or
//! signatures, signed fields containing `|` and out-of-domain values are
//! rejected as
//! [`FailureReason::MalformedMessage`](crate::error::FailureReason::MalformedMessage)
//! before any signature check runs.

pub mod address;
pub mod callback;
pub mod kyc;
pub mod lnurlp;
pub mod payreq;
pub mod version;

use k256::ecdsa::VerifyingKey;

pub use address::{InvalidAddress, UmaAddress, is_valid_uma_address};
pub use callback::PostTransactionCallback;
pub use kyc::KycStatus;
pub use lnurlp::{
    LnurlComplianceResponse, LnurlPayResponse, LnurlpRequest, LnurlpResponse, PayerDataOptions,
};
pub use payreq::{
    CompliancePayerData, LnurlInvoiceResponse, PayReqResponse, PayReqResponseCompliance,
    PayReqResponsePaymentInfo, PayRequest, PayerData, Route, RouteHop,
};
pub use version::UmaVersion;

use crate::error::UmaError;
use crate::keys::{self, VaspSigningKey};
use crate::timestamp::UnixTimestamp;

/// Canonical bytes of a message plus their detached signature and signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Canonical payload the signature covers.
    pub payload: String,
    /// Hex compact signature.
    pub signature: String,
    /// Domain of the VASP that signed.
    pub signer: String,
}

/// Common behaviour of signed UMA messages.
pub trait SignedMessage {
    /// Builds the canonical payload from the message fields.
    fn signable_payload(&self) -> String;

    /// The detached signature.
    fn signature(&self) -> &str;

    /// Stores a fresh signature.
    fn set_signature(&mut self, signature: String);

    /// Replay-protection nonce.
    fn nonce(&self) -> &str;

    /// Time the message was signed.
    fn timestamp(&self) -> UnixTimestamp;

    /// Domain of the VASP whose key must verify this message.
    fn signer_domain(&self) -> &str;

    /// Signs the canonical payload with `key`.
    fn sign_with(&mut self, key: &VaspSigningKey) {
        let signature = key.sign(self.signable_payload().as_bytes());
        self.set_signature(signature);
    }

    /// Checks the signature against `public_key`. Fails closed.
    fn verify_with(&self, public_key: &VerifyingKey) -> bool {
        keys::verify_signature(
            self.signable_payload().as_bytes(),
            self.signature(),
            public_key,
        )
    }

    /// Snapshot of the signed bytes for auditing.
    fn signed_payload(&self) -> SignedPayload {
        SignedPayload {
            payload: self.signable_payload(),
            signature: self.signature().to_owned(),
            signer: self.signer_domain().to_owned(),
        }
    }
}

/// Any of the four handshake messages.
#[derive(Debug, Clone, PartialEq)]
pub enum UmaMessage {
    /// Sender to receiver discovery request.
    LnurlpRequest(LnurlpRequest),
    /// Receiver's answer with currencies and compliance data.
    LnurlpResponse(LnurlpResponse),
    /// Sender's request for an invoice.
    PayRequest(PayRequest),
    /// Receiver's invoice.
    PayReqResponse(PayReqResponse),
}

impl UmaMessage {
    /// Short name of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LnurlpRequest(_) => "lnurlp_request",
            Self::LnurlpResponse(_) => "lnurlp_response",
            Self::PayRequest(_) => "pay_request",
            Self::PayReqResponse(_) => "pay_req_response",
        }
    }

    /// The message as a [`SignedMessage`].
    #[must_use]
    pub fn as_signed(&self) -> &dyn SignedMessage {
        match self {
            Self::LnurlpRequest(m) => m,
            Self::LnurlpResponse(m) => m,
            Self::PayRequest(m) => m,
            Self::PayReqResponse(m) => m,
        }
    }
}

impl From<LnurlpRequest> for UmaMessage {
    fn from(value: LnurlpRequest) -> Self {
        Self::LnurlpRequest(value)
    }
}

impl From<LnurlpResponse> for UmaMessage {
    fn from(value: LnurlpResponse) -> Self {
        Self::LnurlpResponse(value)
    }
}

impl From<PayRequest> for UmaMessage {
    fn from(value: PayRequest) -> Self {
        Self::PayRequest(value)
    }
}

impl From<PayReqResponse> for UmaMessage {
    fn from(value: PayReqResponse) -> Self {
        Self::PayReqResponse(value)
    }
}

/// URL scheme for a VASP domain: `http` for localhost, `https` otherwise.
#[must_use]
pub fn scheme_for_domain(domain: &str) -> &'static str {
    if domain == "localhost" || domain.starts_with("localhost:") {
        "http"
    } else {
        "https"
    }
}

/// Separator of canonical payload fields.
const PAYLOAD_SEPARATOR: &str = "|";

/// Joins payload fields with `|`.
fn join_payload(fields: &[&str]) -> String {
    fields.join(PAYLOAD_SEPARATOR)
}

/// Maps a JSON decoding failure to a malformed-message error naming the field.
fn json_error(err: &serde_json::Error) -> UmaError {
    let message = err.to_string();
    let field = message
        .split('`')
        .nth(1)
        .filter(|_| message.starts_with("missing field") || message.starts_with("unknown variant"))
        .unwrap_or("body")
        .to_owned();
    UmaError::malformed(field, message)
}

/// Rejects empty required strings.
fn require_non_empty(value: &str, field: &str) -> Result<(), UmaError> {
    if value.trim().is_empty() {
        Err(UmaError::malformed(field, format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Rejects empty signed fields and signed fields that would shift the
/// boundaries of the canonical payload.
fn require_payload_field(value: &str, field: &str) -> Result<(), UmaError> {
    require_non_empty(value, field)?;
    if value.contains(PAYLOAD_SEPARATOR) {
        return Err(UmaError::malformed(
            field,
            format!("{field} must not contain {PAYLOAD_SEPARATOR}"),
        ));
    }
    Ok(())
}

/// Parses an address-valued field.
fn require_address(value: &str, field: &str) -> Result<UmaAddress, UmaError> {
    UmaAddress::parse(value).map_err(|e| UmaError::malformed(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_name_the_missing_field() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Needs {
            callback: String,
        }
        let err = serde_json::from_str::<Needs>("{}").unwrap_err();
        let uma = json_error(&err);
        assert_eq!(uma.field(), Some("callback"));

        let err = serde_json::from_str::<Needs>("not json").unwrap_err();
        assert_eq!(json_error(&err).field(), Some("body"));
    }

    #[test]
    fn signed_fields_may_not_contain_the_separator() {
        assert!(require_payload_field("a1b2", "nonce").is_ok());
        let err = require_payload_field("a|b", "nonce").unwrap_err();
        assert_eq!(err.field(), Some("nonce"));
        assert!(require_payload_field("  ", "nonce").is_err());
    }
}
