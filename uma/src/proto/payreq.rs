//! PayRequest and the receiver's signed invoice response.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{
    KycStatus, SignedMessage, join_payload, json_error, require_address, require_non_empty,
    require_payload_field,
};
use crate::error::UmaError;
use crate::timestamp::UnixTimestamp;

/// Path prefix of UMA PayRequest callbacks; the receiving user's id follows.
pub const PAYREQ_PATH: &str = "/api/uma/payreq/";

/// Path prefix of plain LNURL pay callbacks; the receiving user's id follows.
pub const LNURL_PAYREQ_PATH: &str = "/api/lnurl/payreq/";

/// Path the counterparty posts its settled UTXOs to.
pub const UTXO_CALLBACK_PATH: &str = "/api/uma/utxoCallback";

/// Compliance data the sending VASP attaches to a [`PayRequest`].
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompliancePayerData {
    /// UTXOs of channels the sender is likely to pay over.
    #[serde(default)]
    pub utxos: Vec<String>,
    /// Public key of the sender's Lightning node.
    pub node_pub_key: Option<String>,
    /// Sender's KYC status.
    pub kyc_status: KycStatus,
    /// Travel-rule information about the sender, when required.
    pub travel_rule_info: Option<String>,
    /// Hex signature over the canonical payload.
    pub signature: String,
    /// Replay-protection nonce.
    pub signature_nonce: String,
    /// Signing time.
    pub signature_timestamp: UnixTimestamp,
    /// URL the receiver posts its UTXOs to after settlement.
    pub utxo_callback: String,
}

/// Information identifying the payer.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerData {
    /// Payer's UMA address.
    pub identifier: String,
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Signed compliance section.
    pub compliance: CompliancePayerData,
}

/// Sender's request for an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    /// Code of the currency the receiver will be credited in.
    pub currency: String,
    /// Amount in the currency's smallest unit.
    pub amount: u64,
    /// Payer identification.
    pub payer_data: PayerData,
}

impl PayRequest {
    /// Parses and structurally validates a request body.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn parse(body: &[u8]) -> Result<Self, UmaError> {
        let request: Self = serde_json::from_slice(body).map_err(|e| json_error(&e))?;
        request.validate()?;
        Ok(request)
    }

    /// Checks field domains that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error naming the offending field.
    pub fn validate(&self) -> Result<(), UmaError> {
        require_non_empty(&self.currency, "currency")?;
        require_address(&self.payer_data.identifier, "payerData.identifier")?;
        require_payload_field(&self.payer_data.identifier, "payerData.identifier")?;
        let compliance = &self.payer_data.compliance;
        require_non_empty(&compliance.signature, "payerData.compliance.signature")?;
        require_payload_field(
            &compliance.signature_nonce,
            "payerData.compliance.signatureNonce",
        )?;
        Ok(())
    }
}

impl SignedMessage for PayRequest {
    fn signable_payload(&self) -> String {
        join_payload(&[
            &self.payer_data.identifier,
            &self.payer_data.compliance.signature_nonce,
            &self.payer_data.compliance.signature_timestamp.to_string(),
        ])
    }

    fn signature(&self) -> &str {
        &self.payer_data.compliance.signature
    }

    fn set_signature(&mut self, signature: String) {
        self.payer_data.compliance.signature = signature;
    }

    fn nonce(&self) -> &str {
        &self.payer_data.compliance.signature_nonce
    }

    fn timestamp(&self) -> UnixTimestamp {
        self.payer_data.compliance.signature_timestamp
    }

    fn signer_domain(&self) -> &str {
        self.payer_data
            .identifier
            .rsplit_once('@')
            .map_or("", |(_, domain)| domain)
    }
}

/// One hop of a legacy LNURL route hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    /// Node public key.
    pub pubkey: String,
    /// Fee in millisatoshis.
    pub fee: u64,
    /// Amount in millisatoshis.
    pub msatoshi: u64,
    /// Channel id.
    pub channel: String,
}

/// Legacy LNURL route hint, usually empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Node public key.
    pub pubkey: String,
    /// Hops.
    pub path: Vec<RouteHop>,
}

/// Compliance section of a [`PayReqResponse`].
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayReqResponseCompliance {
    /// Public key of the receiver's Lightning node.
    pub node_pub_key: Option<String>,
    /// UTXOs of channels the receiver is likely to be paid over.
    #[serde(default)]
    pub utxos: Vec<String>,
    /// URL the sender posts its UTXOs to after settlement.
    pub utxo_callback: String,
    /// Receiver's UMA address.
    pub payee_identifier: String,
    /// Hex signature over the canonical payload.
    pub signature: String,
    /// Replay-protection nonce.
    pub signature_nonce: String,
    /// Signing time.
    pub signature_timestamp: UnixTimestamp,
}

/// Conversion applied by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayReqResponsePaymentInfo {
    /// Currency the receiver is credited in.
    pub currency_code: String,
    /// Millisatoshis per smallest unit.
    pub multiplier: u64,
    /// Receiver's fees in millisatoshis, on top of the converted amount.
    pub exchange_fees_millisatoshi: u64,
}

/// Receiver's signed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayReqResponse {
    /// BOLT11 invoice.
    #[serde(rename = "pr")]
    pub encoded_invoice: String,
    /// Legacy route hints.
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Signed compliance section.
    pub compliance: PayReqResponseCompliance,
    /// Conversion applied.
    pub payment_info: PayReqResponsePaymentInfo,
}

impl PayReqResponse {
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
        require_non_empty(&self.encoded_invoice, "pr")?;
        require_address(&self.compliance.payee_identifier, "compliance.payeeIdentifier")?;
        require_payload_field(&self.compliance.payee_identifier, "compliance.payeeIdentifier")?;
        require_non_empty(&self.compliance.signature, "compliance.signature")?;
        require_payload_field(&self.compliance.signature_nonce, "compliance.signatureNonce")?;
        if self.payment_info.multiplier == 0 {
            return Err(UmaError::malformed(
                "paymentInfo.multiplier",
                "multiplier must be at least 1",
            ));
        }
        Ok(())
    }

    /// Total millisatoshis the invoice is expected to carry for `amount`.
    #[must_use]
    pub fn expected_msats(&self, amount: u64) -> Option<u64> {
        amount
            .checked_mul(self.payment_info.multiplier)?
            .checked_add(self.payment_info.exchange_fees_millisatoshi)
    }
}

impl SignedMessage for PayReqResponse {
    fn signable_payload(&self) -> String {
        join_payload(&[
            &self.compliance.payee_identifier,
            &self.compliance.signature_nonce,
            &self.compliance.signature_timestamp.to_string(),
            &self.encoded_invoice,
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
            .payee_identifier
            .rsplit_once('@')
            .map_or("", |(_, domain)| domain)
    }
}

/// Invoice returned to a plain LNURL pay callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlInvoiceResponse {
    /// BOLT11 invoice.
    pub pr: String,
    /// Legacy route hints.
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::parse_public_key;
    use crate::keys::tests::test_key;

    fn pay_request() -> PayRequest {
        PayRequest {
            currency: "SAT".to_owned(),
            amount: 1_000,
            payer_data: PayerData {
                identifier: "$alice@pay.example.com".to_owned(),
                name: Some("Alice".to_owned()),
                email: None,
                compliance: CompliancePayerData {
                    utxos: vec![],
                    node_pub_key: None,
                    kyc_status: KycStatus::Verified,
                    travel_rule_info: None,
                    signature: String::new(),
                    signature_nonce: "42".to_owned(),
                    signature_timestamp: UnixTimestamp::from_secs(1_700_000_010),
                    utxo_callback: "https://pay.example.com/api/uma/utxoCallback".to_owned(),
                },
            },
        }
    }

    fn pay_req_response() -> PayReqResponse {
        PayReqResponse {
            encoded_invoice: "lnbc10u1demo".to_owned(),
            routes: vec![],
            compliance: PayReqResponseCompliance {
                node_pub_key: Some("02ab".to_owned()),
                utxos: vec![],
                utxo_callback: "https://receive.example.com/api/uma/utxoCallback".to_owned(),
                payee_identifier: "$bob@receive.example.com".to_owned(),
                signature: String::new(),
                signature_nonce: "43".to_owned(),
                signature_timestamp: UnixTimestamp::from_secs(1_700_000_011),
            },
            payment_info: PayReqResponsePaymentInfo {
                currency_code: "SAT".to_owned(),
                multiplier: 1_000,
                exchange_fees_millisatoshi: 0,
            },
        }
    }

    #[test]
    fn pay_request_signature_round_trips_through_json() {
        let key = test_key(0x11);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let mut req = pay_request();
        req.sign_with(&key);
        assert_eq!(
            req.signable_payload(),
            "$alice@pay.example.com|42|1700000010"
        );

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("nodePubKey"));
        let parsed = PayRequest::parse(json.as_bytes()).unwrap();
        assert!(parsed.verify_with(&public));
        assert_eq!(parsed.signer_domain(), "pay.example.com");
    }

    #[test]
    fn pay_request_rejects_negative_amounts_and_bad_identifiers() {
        let mut json = serde_json::to_value(pay_request()).unwrap();
        json["payerData"]["compliance"]["signature"] = "ab".into();
        json["amount"] = (-5).into();
        assert!(PayRequest::parse(json.to_string().as_bytes()).is_err());

        json["amount"] = 5.into();
        json["payerData"]["identifier"] = "alice@pay.example.com".into();
        let err = PayRequest::parse(json.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.field(), Some("payerData.identifier"));
    }

    #[test]
    fn identifiers_and_nonces_may_not_contain_the_separator() {
        let mut json = serde_json::to_value(pay_request()).unwrap();
        json["payerData"]["compliance"]["signature"] = "ab".into();
        json["payerData"]["identifier"] = "$alice@pay.example.com|42".into();
        let err = PayRequest::parse(json.to_string().as_bytes()).unwrap_err();
        assert_eq!(err.field(), Some("payerData.identifier"));

        let mut resp = pay_req_response();
        resp.compliance.signature = "ab".to_owned();
        resp.compliance.signature_nonce = "4|3".to_owned();
        let err = PayReqResponse::parse(&serde_json::to_vec(&resp).unwrap()).unwrap_err();
        assert_eq!(err.field(), Some("compliance.signatureNonce"));
    }

    #[test]
    fn pay_req_response_binds_the_invoice() {
        let key = test_key(0x22);
        let public = parse_public_key(&key.public_key_hex()).unwrap();
        let mut resp = pay_req_response();
        resp.sign_with(&key);

        let parsed = PayReqResponse::parse(&serde_json::to_vec(&resp).unwrap()).unwrap();
        assert!(parsed.verify_with(&public));

        let mut swapped = parsed;
        swapped.encoded_invoice = "lnbc10u1attacker".to_owned();
        assert!(!swapped.verify_with(&public));
    }

    #[test]
    fn expected_msats_includes_fees() {
        let mut resp = pay_req_response();
        resp.payment_info.exchange_fees_millisatoshi = 5;
        assert_eq!(resp.expected_msats(1_000), Some(1_000_005));
        assert_eq!(resp.expected_msats(u64::MAX), None);
    }
}
