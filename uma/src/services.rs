//! Capabilities a VASP injects into the handshake.
//!
//! User records, compliance policy, invoice creation, Lightning payment and
//! bookkeeping all live outside this crate. The orchestrators hold them as
//! trait objects and never construct concrete implementations.

use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::proto::{KycStatus, UmaAddress};

/// Amount, in millisatoshis, from which travel-rule data must be exchanged.
pub const TRAVEL_RULE_THRESHOLD_MSATS: u64 = 1_000_000_000;

/// Whether a transaction needs travel-rule data attached.
#[must_use]
pub const fn requires_travel_rule_info(amount_msats: u64, counterparty_is_subject: bool) -> bool {
    counterparty_is_subject && amount_msats >= TRAVEL_RULE_THRESHOLD_MSATS
}

/// Failure reported by an injected capability.
#[derive(Debug, thiserror::Error)]
#[error("{service}: {message}")]
pub struct ServiceError {
    service: &'static str,
    message: String,
}

impl ServiceError {
    /// Creates an error attributed to `service`.
    #[must_use]
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }

    /// Name of the failing capability.
    #[must_use]
    pub const fn service(&self) -> &'static str {
        self.service
    }
}

/// A VASP user, as read by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable internal id.
    pub id: String,
    /// User name part of the UMA address, without `$`.
    pub uma_user_name: String,
    /// KYC status.
    #[serde(default)]
    pub kyc_status: KycStatus,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl User {
    /// Full UMA address of the user at `domain`.
    #[must_use]
    pub fn uma_address(&self, domain: &str) -> String {
        format!("${}@{domain}", self.uma_user_name)
    }
}

/// Inclusive millisatoshi range a user can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsatsRange {
    /// Lower bound.
    pub min: u64,
    /// Upper bound.
    pub max: u64,
}

/// Read access to the VASP's user records.
#[async_trait::async_trait]
pub trait UserService: Send + Sync + Debug {
    /// Looks a user up by UMA user name.
    async fn get_user_by_uma(&self, uma_user_name: &str) -> Result<Option<User>, ServiceError>;

    /// Looks a user up by internal id.
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError>;

    /// Currencies the user accepts, in preference order.
    async fn get_currency_preferences_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Currency>, ServiceError>;

    /// Range of millisatoshis the user can receive.
    async fn get_receivable_msats_range_for_user(
        &self,
        user_id: &str,
    ) -> Result<MsatsRange, ServiceError>;
}

/// Direction of a payment, from this VASP's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentDirection {
    /// Outgoing payment.
    Sent,
    /// Incoming payment.
    Received,
}

/// A channel UTXO and the amount that moved over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoWithAmount {
    /// `<transaction_hash>:<output_index>`.
    pub utxo: String,
    /// Millisatoshis moved.
    pub amount: u64,
}

/// Per-transaction verdict of the sender's compliance policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceDecision {
    /// Whether the transaction may proceed.
    pub accepted: bool,
    /// Travel-rule data to attach.
    pub travel_rule_info: Option<String>,
}

impl ComplianceDecision {
    /// An accepting decision.
    #[must_use]
    pub const fn accept(travel_rule_info: Option<String>) -> Self {
        Self {
            accepted: true,
            travel_rule_info,
        }
    }

    /// A rejecting decision.
    #[must_use]
    pub const fn reject() -> Self {
        Self {
            accepted: false,
            travel_rule_info: None,
        }
    }
}

/// Counterparty details submitted for transaction pre-screening.
#[derive(Debug, Clone, Copy)]
pub struct PreScreenRequest<'a> {
    /// Sender's UMA address.
    pub sending_uma: &'a str,
    /// Receiver's UMA address.
    pub receiving_uma: &'a str,
    /// Amount in millisatoshis.
    pub amount_msats: u64,
    /// Counterparty's Lightning node, when known.
    pub counterparty_node_id: Option<&'a str>,
    /// Counterparty's channel UTXOs.
    pub counterparty_utxos: &'a [String],
}

/// KYC, KYT and travel-rule policy of the VASP.
#[async_trait::async_trait]
pub trait ComplianceService: Send + Sync + Debug {
    /// Whether to accept a payment from users of `sending_vasp_domain`.
    async fn should_accept_transaction_from_vasp(
        &self,
        sending_vasp_domain: &str,
        receiving_uma: &UmaAddress,
    ) -> Result<bool, ServiceError>;

    /// Whether to send a payment to users of `receiving_vasp_domain`.
    async fn should_accept_transaction_to_vasp(
        &self,
        receiving_vasp_domain: &str,
        sending_uma: &UmaAddress,
        receiving_uma: &UmaAddress,
    ) -> Result<bool, ServiceError>;

    /// Screens a transaction before any funds move.
    async fn pre_screen_transaction(
        &self,
        request: &PreScreenRequest<'_>,
    ) -> Result<bool, ServiceError>;

    /// Hands a settled payment to transaction monitoring.
    async fn register_transaction_monitoring(
        &self,
        payment_id: &str,
        node_pub_key: Option<&str>,
        direction: PaymentDirection,
        utxos_with_amounts: &[UtxoWithAmount],
    ) -> Result<(), ServiceError>;

    /// Decides on an outgoing transaction before the PayRequest is sent,
    /// supplying the travel-rule data to attach when it is accepted.
    async fn screen_outgoing_transaction(
        &self,
        sending_user_id: &str,
        sending_uma: &UmaAddress,
        receiving_uma: &UmaAddress,
        amount_msats: u64,
    ) -> Result<ComplianceDecision, ServiceError>;
}

/// Invoice creation on the receiving VASP's Lightning node.
#[async_trait::async_trait]
pub trait InvoiceCreator: Send + Sync + Debug {
    /// Creates a BOLT11 invoice for `amount_msats` whose description hash
    /// commits to `metadata`.
    async fn create_invoice(
        &self,
        amount_msats: u64,
        metadata: &str,
        expiry: Duration,
    ) -> Result<String, ServiceError>;
}

/// A completed outgoing Lightning payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPayment {
    /// Provider-side payment id.
    pub payment_id: String,
    /// Channels the payment went over.
    pub utxos_with_amounts: Vec<UtxoWithAmount>,
}

/// Failure paying an invoice.
#[derive(Debug, thiserror::Error)]
pub enum PayInvoiceError {
    /// The invoice expired before it was paid.
    #[error("invoice expired")]
    Expired,
    /// The payment failed.
    #[error("payment failed: {0}")]
    Failed(String),
}

/// The sending VASP's Lightning client.
#[async_trait::async_trait]
pub trait LightningPayer: Send + Sync + Debug {
    /// Pays a BOLT11 invoice.
    async fn pay_invoice(&self, encoded_invoice: &str) -> Result<OutgoingPayment, PayInvoiceError>;
}

/// An outgoing transaction as booked by the sending VASP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Paying user.
    pub user_id: String,
    /// Receiver's UMA address.
    pub receiving_uma: String,
    /// Total millisatoshis.
    pub amount_msats: u64,
    /// Amount in the receiving currency's smallest unit.
    pub amount: u64,
    /// Receiving currency.
    pub currency_code: String,
}

/// Balance bookkeeping of the sending VASP.
#[async_trait::async_trait]
pub trait InternalLedgerService: Send + Sync + Debug {
    /// A payment is about to be attempted.
    async fn record_outgoing_transaction_began(&self, entry: &LedgerEntry)
    -> Result<(), ServiceError>;

    /// The payment settled.
    async fn record_outgoing_transaction_succeeded(
        &self,
        entry: &LedgerEntry,
        payment_id: &str,
    ) -> Result<(), ServiceError>;

    /// The payment failed.
    async fn record_outgoing_transaction_failed(
        &self,
        entry: &LedgerEntry,
        reason: &str,
    ) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn travel_rule_applies_from_the_threshold_up() {
        assert!(!requires_travel_rule_info(TRAVEL_RULE_THRESHOLD_MSATS - 1, true));
        assert!(requires_travel_rule_info(TRAVEL_RULE_THRESHOLD_MSATS, true));
        assert!(!requires_travel_rule_info(u64::MAX, false));
    }

    #[test]
    fn rejections_carry_no_travel_rule_data() {
        let rejected = ComplianceDecision::reject();
        assert!(!rejected.accepted);
        assert!(rejected.travel_rule_info.is_none());
        assert!(ComplianceDecision::accept(Some("{}".into())).accepted);
    }

    #[test]
    fn user_address_is_dollar_prefixed() {
        let user = User {
            id: "u1".into(),
            uma_user_name: "bob".into(),
            kyc_status: KycStatus::Verified,
            email: None,
            name: None,
        };
        assert_eq!(user.uma_address("receive.example.com"), "$bob@receive.example.com");
    }
}
