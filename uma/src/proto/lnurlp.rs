//! LNURLp discovery: the signed request URL and the receiver's response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    KycStatus, SignedMessage, UmaAddress, UmaVersion, join_payload, json_error, require_address,
    require_non_empty, require_payload_field, scheme_for_domain,
};
use crate::currency::Currency;
use crate::error::UmaError;
use crate::timestamp::UnixTimestamp;

/// LNURLp tag identifying a pay request.
pub const PAY_REQUEST_TAG: &str = "payRequest";

/// Path prefix of the LNURLp discovery endpoint.
pub const LNURLP_PATH: &str = "/.well-known/lnurlp/";

/// Query parameters only a UMA discovery request carries.
const UMA_QUERY_PARAMETERS: [&str; 5] =
    ["signature", "vaspDomain", "nonce", "timestamp", "umaVersion"];

/// First message of the handshake, sent by the sending VASP as a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LnurlpRequest {
    /// Address of the receiving user.
    pub receiver_address: UmaAddress,
    /// Replay-protection nonce.
    pub nonce: String,
    /// Hex signature over `receiverAddress|nonce|timestamp`.
    pub signature: String,
    /// Whether the sending VASP must exchange travel-rule data.
    pub is_subject_to_travel_rule: bool,
    /// Domain of the sending VASP, used to fetch its public keys.
    pub vasp_domain: String,
    /// Signing time.
    pub timestamp: UnixTimestamp,
    /// Version the sender prefers.
    pub uma_version: UmaVersion,
}

impl LnurlpRequest {
    /// Creates an unsigned request.
    #[must_use]
    pub fn new(
        receiver_address: UmaAddress,
        vasp_domain: impl Into<String>,
        nonce: impl Into<String>,
        timestamp: UnixTimestamp,
    ) -> Self {
        Self {
            receiver_address,
            nonce: nonce.into(),
            signature: String::new(),
            is_subject_to_travel_rule: false,
            vasp_domain: vasp_domain.into(),
            timestamp,
            uma_version: UmaVersion::CURRENT,
        }
    }

    /// Sets the travel-rule flag.
    #[must_use]
    pub const fn with_travel_rule(mut self, is_subject_to_travel_rule: bool) -> Self {
        self.is_subject_to_travel_rule = is_subject_to_travel_rule;
        self
    }

    /// Sets the preferred protocol version.
    #[must_use]
    pub const fn with_version(mut self, uma_version: UmaVersion) -> Self {
        self.uma_version = uma_version;
        self
    }

    /// Encodes the request as the receiver's discovery URL.
    ///
    /// The scheme is `http` only for `localhost` receivers.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::MalformedMessage`](crate::error::FailureReason::MalformedMessage)
    /// if the receiver domain cannot form a URL.
    pub fn encode_to_url(&self) -> Result<Url, UmaError> {
        let domain = self.receiver_address.domain();
        let scheme = scheme_for_domain(domain);
        let raw = format!(
            "{scheme}://{domain}{LNURLP_PATH}${}",
            self.receiver_address.user()
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| UmaError::malformed("receiverAddress", e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("signature", &self.signature)
            .append_pair("vaspDomain", &self.vasp_domain)
            .append_pair("nonce", &self.nonce)
            .append_pair(
                "isSubjectToTravelRule",
                if self.is_subject_to_travel_rule { "true" } else { "false" },
            )
            .append_pair("timestamp", &self.timestamp.to_string())
            .append_pair("umaVersion", &self.uma_version.to_string());
        Ok(url)
    }

    /// Parses a discovery URL received by the receiving VASP.
    ///
    /// The receiver address is rebuilt from the last path segment and the
    /// URL authority, exactly as the sender signed it.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the first missing or invalid
    /// path segment or query parameter.
    pub fn parse(url: &Url) -> Result<Self, UmaError> {
        let segments: Vec<&str> = url.path_segments().map(Iterator::collect).unwrap_or_default();
        let user = match segments.as_slice() {
            [".well-known", "lnurlp", user] if !user.is_empty() => *user,
            _ => return Err(UmaError::malformed("path", "invalid uma request path")),
        };
        let user = user
            .strip_prefix('$')
            .or_else(|| user.strip_prefix("%24"))
            .unwrap_or(user);
        let host = url
            .host_str()
            .ok_or_else(|| UmaError::malformed("host", "request url has no host"))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let receiver_address = require_address(&format!("${user}@{authority}"), "receiverAddress")?;

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let required = |name: &str| -> Result<String, UmaError> {
            match query.get(name) {
                Some(v) if !v.trim().is_empty() => Ok(v.clone()),
                _ => Err(UmaError::malformed(name, format!("missing query parameter {name}"))),
            }
        };

        let signature = required("signature")?;
        let vasp_domain = required("vaspDomain")?;
        let nonce = required("nonce")?;
        require_payload_field(&nonce, "nonce")?;
        let timestamp = required("timestamp")?
            .parse::<u64>()
            .map(UnixTimestamp::from_secs)
            .map_err(|e| UmaError::malformed("timestamp", e.to_string()))?;
        let uma_version = required("umaVersion")?
            .parse::<UmaVersion>()
            .map_err(|e| UmaError::malformed("umaVersion", e.to_string()))?;
        let is_subject_to_travel_rule = query
            .get("isSubjectToTravelRule")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            receiver_address,
            nonce,
            signature,
            is_subject_to_travel_rule,
            vasp_domain,
            timestamp,
            uma_version,
        })
    }

    /// Whether `url` is a well-formed UMA discovery request.
    #[must_use]
    pub fn is_uma_request(url: &Url) -> bool {
        Self::parse(url).is_ok()
    }

    /// Whether `url` carries any UMA query parameter.
    ///
    /// A discovery URL with none of them is a plain LNURLp request; one with
    /// some of them is held to the strict UMA parse.
    #[must_use]
    pub fn has_uma_parameters(url: &Url) -> bool {
        url.query_pairs()
            .any(|(name, _)| UMA_QUERY_PARAMETERS.contains(&name.as_ref()))
    }
}

impl SignedMessage for LnurlpRequest {
    fn signable_payload(&self) -> String {
        join_payload(&[
            self.receiver_address.as_str(),
            &self.nonce,
            &self.timestamp.to_string(),
        ])
    }

    fn signature(&self) -> &str {
        &self.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }

    fn nonce(&self) -> &str {
        &self.nonce
    }

    fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    fn signer_domain(&self) -> &str {
        &self.vasp_domain
    }
}

/// Payer data the receiver asks the sender to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerDataOptions {
    /// Payer name must be present.
    #[serde(default)]
    pub name_required: bool,
    /// Payer email must be present.
    #[serde(default)]
    pub email_required: bool,
    /// Compliance data must be present.
    #[serde(default = "default_true")]
    pub compliance_required: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for PayerDataOptions {
    fn default() -> Self {
        Self {
            name_required: false,
            email_required: false,
            compliance_required: true,
        }
    }
}

/// Compliance section of an [`LnurlpResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnurlComplianceResponse {
    /// Whether the receiving VASP holds KYC data on the receiver.
    pub kyc_status: KycStatus,
    /// Hex signature over the canonical payload.
    pub signature: String,
    /// Replay-protection nonce.
    pub signature_nonce: String,
    /// Signing time.
    pub signature_timestamp: UnixTimestamp,
    /// Whether the receiving VASP must exchange travel-rule data.
    pub is_subject_to_travel_rule: bool,
    /// Full UMA address of the receiver.
    pub receiver_identifier: String,
}

/// Receiver's answer to an [`LnurlpRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnurlpResponse {
    /// Always [`PAY_REQUEST_TAG`].
    pub tag: String,
    /// URL the PayRequest must be posted to.
    pub callback: Url,
    /// Smallest receivable amount in millisatoshis.
    pub min_sendable: u64,
    /// Largest receivable amount in millisatoshis.
    pub max_sendable: u64,
    /// LNURL metadata, a JSON-encoded string.
    pub metadata: String,
    /// Currencies the receiver can settle in.
    pub currencies: Vec<Currency>,
    /// Payer data the receiver requires.
    #[serde(rename = "payerData")]
    pub required_payer_data: PayerDataOptions,
    /// Signed compliance section.
    pub compliance: LnurlComplianceResponse,
    /// Version the receiver chose.
    pub uma_version: UmaVersion,
}

impl LnurlpResponse {
    /// Parses and structurally validates a response body.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn parse(body: &[u8]) -> Result<Self, UmaError> {
        let response: Self = serde_json::from_slice(body).map_err(|e| json_error(&e))?;
        response.validate()?;
        Ok(response)
    }

    /// Checks field domains that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn validate(&self) -> Result<(), UmaError> {
        if self.tag != PAY_REQUEST_TAG {
            return Err(UmaError::malformed("tag", format!("unexpected tag {}", self.tag)));
        }
        if self.min_sendable > self.max_sendable {
            return Err(UmaError::malformed(
                "minSendable",
                "minSendable exceeds maxSendable",
            ));
        }
        if self.currencies.is_empty() {
            return Err(UmaError::malformed("currencies", "no currencies offered"));
        }
        require_non_empty(&self.compliance.signature, "compliance.signature")?;
        require_payload_field(&self.compliance.signature_nonce, "compliance.signatureNonce")?;
        require_address(
            &self.compliance.receiver_identifier,
            "compliance.receiverIdentifier",
        )?;
        require_payload_field(
            &self.compliance.receiver_identifier,
            "compliance.receiverIdentifier",
        )?;
        Ok(())
    }

    /// Finds an offered currency by code.
    #[must_use]
    pub fn currency(&self, code: &str) -> Option<&Currency> {
        self.currencies.iter().find(|c| c.code() == code)
    }
}

impl SignedMessage for LnurlpResponse {
    fn signable_payload(&self) -> String {
        join_payload(&[
            &self.compliance.receiver_identifier,
            &self.compliance.signature_nonce,
            &self.compliance.signature_timestamp.to_string(),
        ])
    }

    fn signature(&self) -> &str {
        &self.compliance.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.compliance.signature = signature;
    }

    fn nonce(&self) -> &str {
        &self.compliance.signature_nonce
    }

    fn timestamp(&self) -> UnixTimestamp {
        self.compliance.signature_timestamp
    }

    fn signer_domain(&self) -> &str {
        self.compliance
            .receiver_identifier
            .rsplit_once('@')
            .map_or("", |(_, domain)| domain)
    }
}

/// Answer to a plain LNURLp request, for wallets that do not speak UMA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnurlPayResponse {
    /// Always [`PAY_REQUEST_TAG`].
    pub tag: String,
    /// URL the wallet requests the invoice from with `?amount=<msats>`.
    pub callback: Url,
    /// Smallest receivable amount in millisatoshis.
    pub min_sendable: u64,
    /// Largest receivable amount in millisatoshis.
    pub max_sendable: u64,
    /// LNURL metadata, a JSON-encoded string.
    pub metadata: String,
}
