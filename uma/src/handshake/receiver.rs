use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use url::Url;

use super::{KeyResolver, audit_failure, bounded, check_nonce, rejected, service_failure};
use crate::config::{HandshakeConfig, VaspIdentity};
use crate::currency::Currency;
use crate::error::{FailureReason, UmaError};
use crate::keys::{PubKeyResponse, generate_nonce};
use crate::nonce::NonceValidator;
use crate::proto::lnurlp::PAY_REQUEST_TAG;
use crate::proto::payreq::{LNURL_PAYREQ_PATH, PAYREQ_PATH, UTXO_CALLBACK_PATH};
use crate::proto::version::supported_major_versions;
use crate::proto::{
    LnurlComplianceResponse, LnurlInvoiceResponse, LnurlPayResponse, LnurlpRequest,
    LnurlpResponse, PayReqResponse, PayReqResponseCompliance, PayReqResponsePaymentInfo,
    PayRequest, PayerDataOptions, PostTransactionCallback, SignedMessage,
};
use crate::services::{
    ComplianceService, InvoiceCreator, MsatsRange, PaymentDirection, PreScreenRequest, User,
    UserService, requires_travel_rule_info,
};
use crate::timestamp::UnixTimestamp;

/// The receiving side of UMA.
///
/// Answers LNURLp and PayRequest messages. Holds no per-handshake state; the
/// sender's callback URL carries the receiving user's id between the two steps.
#[derive(Debug)]
pub struct ReceivingVasp {
    identity: VaspIdentity,
    keys: KeyResolver,
    nonces: Arc<dyn NonceValidator>,
    users: Arc<dyn UserService>,
    compliance: Arc<dyn ComplianceService>,
    invoices: Arc<dyn InvoiceCreator>,
    config: HandshakeConfig,
    cancel: CancellationToken,
}

impl ReceivingVasp {
    /// Creates a receiving VASP with the default [`HandshakeConfig`].
    #[must_use]
    pub fn new(
        identity: VaspIdentity,
        keys: KeyResolver,
        nonces: Arc<dyn NonceValidator>,
        users: Arc<dyn UserService>,
        compliance: Arc<dyn ComplianceService>,
        invoices: Arc<dyn InvoiceCreator>,
    ) -> Self {
        Self {
            identity,
            keys,
            nonces,
            users,
            compliance,
            invoices,
            config: HandshakeConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the handshake configuration.
    #[must_use]
    pub fn with_config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    /// Aborts in-flight requests with [`FailureReason::Cancelled`] once
    /// `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// This VASP's identity.
    #[must_use]
    pub const fn identity(&self) -> &VaspIdentity {
        &self.identity
    }

    /// Bundle to serve at `/.well-known/lnurlpubkey`.
    #[must_use]
    pub fn pub_key_response(&self) -> PubKeyResponse {
        self.identity.pub_key_response()
    }

    /// Answers a signed LNURLp discovery request.
    ///
    /// # Errors
    ///
    /// Returns the reason the request was refused. Nothing is signed or
    /// recorded for a refused request beyond its nonce.
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.receive.lnurlp", skip_all))]
    pub async fn handle_lnurlp_request(&self, url: &Url) -> Result<LnurlpResponse, UmaError> {
        let request = LnurlpRequest::parse(url)
            .inspect_err(|e| audit_failure(e, "lnurlp_request", "unknown"))?;
        self.answer_lnurlp(&request)
            .await
            .inspect_err(|e| audit_failure(e, "lnurlp_request", &request.vasp_domain))
    }

    async fn answer_lnurlp(&self, request: &LnurlpRequest) -> Result<LnurlpResponse, UmaError> {
        let version = request.uma_version.negotiate().ok_or_else(|| {
            UmaError::new(
                FailureReason::UnsupportedVersion,
                format!(
                    "version {} unsupported, supported major versions: {:?}",
                    request.uma_version,
                    supported_major_versions()
                ),
            )
            .with_field("umaVersion")
        })?;

        self.step("lnurlp request verification", self.keys.verify(request))
            .await?;
        check_nonce(self.nonces.as_ref(), request).await?;

        let user = self.user_by_uma(request.receiver_address.user()).await?;
        let allowed = self
            .step("sending vasp screening", async {
                self.compliance
                    .should_accept_transaction_from_vasp(
                        &request.vasp_domain,
                        &request.receiver_address,
                    )
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await?;
        if !allowed {
            return Err(rejected(format!(
                "payments from {} are not accepted",
                request.vasp_domain
            )));
        }

        let currencies = self.currency_preferences(&user.id).await?;
        if currencies.is_empty() {
            return Err(UmaError::new(
                FailureReason::UnsupportedCurrency,
                format!("{} accepts no currencies", request.receiver_address),
            )
            .with_field("currencies"));
        }
        let range = self.receivable_range(&user.id).await?;

        let receiver = user.uma_address(self.identity.domain());
        let callback = self.callback_url(PAYREQ_PATH, &user.id)?;

        let mut response = LnurlpResponse {
            tag: PAY_REQUEST_TAG.to_owned(),
            callback,
            min_sendable: range.min,
            max_sendable: range.max,
            metadata: lnurl_metadata(&receiver),
            currencies,
            required_payer_data: PayerDataOptions::default(),
            compliance: LnurlComplianceResponse {
                kyc_status: user.kyc_status,
                signature: String::new(),
                signature_nonce: generate_nonce(),
                signature_timestamp: UnixTimestamp::now(),
                is_subject_to_travel_rule: self.config.is_subject_to_travel_rule,
                receiver_identifier: receiver,
            },
            uma_version: version,
        };
        response.sign_with(self.identity.signing_key());
        Ok(response)
    }

    /// Answers a signed PayRequest posted to the callback of `user_id`.
    ///
    /// An invoice is created only after the request verified, its nonce was
    /// recorded and compliance accepted it.
    ///
    /// # Errors
    ///
    /// Returns the reason the request was refused.
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.receive.payreq", skip(self, body)))]
    pub async fn handle_pay_request(
        &self,
        user_id: &str,
        body: &[u8],
    ) -> Result<PayReqResponse, UmaError> {
        let request = PayRequest::parse(body)
            .inspect_err(|e| audit_failure(e, "pay_request", "unknown"))?;
        self.answer_pay_request(user_id, &request)
            .await
            .inspect_err(|e| audit_failure(e, "pay_request", request.signer_domain()))
    }

    async fn answer_pay_request(
        &self,
        user_id: &str,
        request: &PayRequest,
    ) -> Result<PayReqResponse, UmaError> {
        self.step("pay request verification", self.keys.verify(request))
            .await?;
        check_nonce(self.nonces.as_ref(), request).await?;

        let user = self.user_by_id(user_id).await?;
        let currencies = self.currency_preferences(&user.id).await?;
        let currency = currencies
            .iter()
            .find(|c| c.code() == request.currency)
            .ok_or_else(|| {
                UmaError::new(
                    FailureReason::UnsupportedCurrency,
                    format!("{} is not accepted", request.currency),
                )
                .with_field("currency")
            })?;
        let out_of_range = |message: String| {
            UmaError::new(FailureReason::CurrencyOutOfRange, message).with_field("amount")
        };
        currency
            .check_amount(request.amount)
            .map_err(|e| out_of_range(e.to_string()))?;
        let amount_msats = currency
            .to_msats(request.amount)
            .ok()
            .and_then(|msats| msats.checked_add(self.config.exchange_fees_msats))
            .ok_or_else(|| out_of_range(format!("{} overflows msats", request.amount)))?;
        let range = self.receivable_range(&user.id).await?;
        check_receivable(range, amount_msats)?;

        let compliance = &request.payer_data.compliance;
        if requires_travel_rule_info(amount_msats, self.config.is_subject_to_travel_rule)
            && compliance.travel_rule_info.is_none()
        {
            return Err(
                rejected("travel rule information is required for this amount")
                    .with_field("payerData.compliance.travelRuleInfo"),
            );
        }

        let receiver = user.uma_address(self.identity.domain());
        let screened = self
            .step("transaction screening", async {
                self.compliance
                    .pre_screen_transaction(&PreScreenRequest {
                        sending_uma: &request.payer_data.identifier,
                        receiving_uma: &receiver,
                        amount_msats,
                        counterparty_node_id: compliance.node_pub_key.as_deref(),
                        counterparty_utxos: &compliance.utxos,
                    })
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await?;
        if !screened {
            return Err(rejected(format!(
                "transaction from {} failed pre-screening",
                request.payer_data.identifier
            )));
        }

        let encoded_invoice = self.create_invoice(amount_msats, &receiver).await?;

        let mut response = PayReqResponse {
            encoded_invoice,
            routes: Vec::new(),
            compliance: PayReqResponseCompliance {
                node_pub_key: self.config.node_pub_key.clone(),
                utxos: Vec::new(),
                utxo_callback: format!(
                    "{}{UTXO_CALLBACK_PATH}?txId={}",
                    self.identity.base_url(),
                    generate_nonce()
                ),
                payee_identifier: receiver,
                signature: String::new(),
                signature_nonce: generate_nonce(),
                signature_timestamp: UnixTimestamp::now(),
            },
            payment_info: PayReqResponsePaymentInfo {
                currency_code: currency.code().to_owned(),
                multiplier: currency.multiplier(),
                exchange_fees_millisatoshi: self.config.exchange_fees_msats,
            },
        };
        response.sign_with(self.identity.signing_key());
        Ok(response)
    }

    /// Answers a plain LNURLp request from a wallet that does not speak UMA.
    ///
    /// No signature, nonce or compliance data is involved; the callback points
    /// at the plain LNURL pay endpoint of the user.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::UserNotFound`] for an unknown user.
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.receive.lnurlp_plain", skip(self)))]
    pub async fn handle_plain_lnurlp_request(
        &self,
        user_name: &str,
    ) -> Result<LnurlPayResponse, UmaError> {
        let user_name = user_name.strip_prefix('$').unwrap_or(user_name);
        self.answer_plain_lnurlp(user_name)
            .await
            .inspect_err(|e| audit_failure(e, "lnurlp_plain", "unknown"))
    }

    async fn answer_plain_lnurlp(&self, user_name: &str) -> Result<LnurlPayResponse, UmaError> {
        let user = self.user_by_uma(user_name).await?;
        let range = self.receivable_range(&user.id).await?;
        Ok(LnurlPayResponse {
            tag: PAY_REQUEST_TAG.to_owned(),
            callback: self.callback_url(LNURL_PAYREQ_PATH, &user.id)?,
            min_sendable: range.min,
            max_sendable: range.max,
            metadata: lnurl_metadata(&user.uma_address(self.identity.domain())),
        })
    }

    /// Issues an invoice of `amount_msats` to a plain LNURL wallet.
    ///
    /// Amounts that would require travel-rule data are refused, since a plain
    /// request cannot carry it.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::UserNotFound`],
    /// [`FailureReason::CurrencyOutOfRange`] or
    /// [`FailureReason::ComplianceRejected`].
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.receive.payreq_plain", skip(self)))]
    pub async fn handle_plain_pay_request(
        &self,
        user_id: &str,
        amount_msats: u64,
    ) -> Result<LnurlInvoiceResponse, UmaError> {
        self.answer_plain_pay_request(user_id, amount_msats)
            .await
            .inspect_err(|e| audit_failure(e, "pay_request_plain", "unknown"))
    }

    async fn answer_plain_pay_request(
        &self,
        user_id: &str,
        amount_msats: u64,
    ) -> Result<LnurlInvoiceResponse, UmaError> {
        let user = self.user_by_id(user_id).await?;
        let range = self.receivable_range(&user.id).await?;
        check_receivable(range, amount_msats)?;
        if requires_travel_rule_info(amount_msats, self.config.is_subject_to_travel_rule) {
            return Err(
                rejected("travel rule information is required for this amount")
                    .with_field("amount"),
            );
        }
        let receiver = user.uma_address(self.identity.domain());
        let pr = self.create_invoice(amount_msats, &receiver).await?;
        Ok(LnurlInvoiceResponse {
            pr,
            routes: Vec::new(),
        })
    }

    /// Accepts a counterparty's signed report of the UTXOs a settled payment
    /// used and registers them with transaction monitoring.
    ///
    /// `tx_id` is the id this VASP put in the advertised callback URL; the
    /// callback's nonce stands in when it is absent.
    ///
    /// # Errors
    ///
    /// Returns the reason the callback was refused.
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.receive.utxo_callback", skip(self, body)))]
    pub async fn handle_post_transaction_callback(
        &self,
        tx_id: Option<&str>,
        body: &[u8],
    ) -> Result<(), UmaError> {
        let callback = PostTransactionCallback::parse(body)
            .inspect_err(|e| audit_failure(e, "utxo_callback", "unknown"))?;
        self.register_callback(tx_id, &callback)
            .await
            .inspect_err(|e| audit_failure(e, "utxo_callback", &callback.vasp_domain))
    }

    async fn register_callback(
        &self,
        tx_id: Option<&str>,
        callback: &PostTransactionCallback,
    ) -> Result<(), UmaError> {
        self.step("utxo callback verification", self.keys.verify(callback))
            .await?;
        check_nonce(self.nonces.as_ref(), callback).await?;
        let payment_id = tx_id.unwrap_or(&callback.signature_nonce);
        self.step("transaction monitoring", async {
            self.compliance
                .register_transaction_monitoring(
                    payment_id,
                    None,
                    PaymentDirection::Received,
                    &callback.utxos,
                )
                .await
                .map_err(|e| service_failure(&e))
        })
        .await
    }

    async fn step<T, F>(&self, name: &'static str, fut: F) -> Result<T, UmaError>
    where
        F: Future<Output = Result<T, UmaError>> + Send,
        T: Send,
    {
        bounded(&self.cancel, self.config.step_timeout, name, fut).await
    }

    async fn user_by_uma(&self, user_name: &str) -> Result<User, UmaError> {
        self.step("user lookup", async {
            self.users
                .get_user_by_uma(user_name)
                .await
                .map_err(|e| service_failure(&e))
        })
        .await?
        .ok_or_else(|| {
            UmaError::new(
                FailureReason::UserNotFound,
                format!("${user_name}@{} does not exist", self.identity.domain()),
            )
            .with_field("receiverAddress")
        })
    }

    async fn user_by_id(&self, user_id: &str) -> Result<User, UmaError> {
        self.step("user lookup", async {
            self.users
                .get_user_by_id(user_id)
                .await
                .map_err(|e| service_failure(&e))
        })
        .await?
        .ok_or_else(|| {
            UmaError::new(FailureReason::UserNotFound, format!("no user with id {user_id}"))
                .with_field("userId")
        })
    }

    async fn currency_preferences(&self, user_id: &str) -> Result<Vec<Currency>, UmaError> {
        self.step("currency preferences", async {
            self.users
                .get_currency_preferences_for_user(user_id)
                .await
                .map_err(|e| service_failure(&e))
        })
        .await
    }

    async fn receivable_range(&self, user_id: &str) -> Result<MsatsRange, UmaError> {
        self.step("receivable range", async {
            self.users
                .get_receivable_msats_range_for_user(user_id)
                .await
                .map_err(|e| service_failure(&e))
        })
        .await
    }

    async fn create_invoice(&self, amount_msats: u64, receiver: &str) -> Result<String, UmaError> {
        self.step("invoice creation", async {
            self.invoices
                .create_invoice(
                    amount_msats,
                    &lnurl_metadata(receiver),
                    self.config.invoice_expiry,
                )
                .await
                .map_err(|e| service_failure(&e))
        })
        .await
    }

    fn callback_url(&self, prefix: &str, user_id: &str) -> Result<Url, UmaError> {
        Url::parse(&format!("{}{prefix}{user_id}", self.identity.base_url()))
            .map_err(|e| UmaError::new(FailureReason::Internal, e.to_string()))
    }
}

fn check_receivable(range: MsatsRange, amount_msats: u64) -> Result<(), UmaError> {
    if (range.min..=range.max).contains(&amount_msats) {
        Ok(())
    } else {
        Err(UmaError::new(
            FailureReason::CurrencyOutOfRange,
            format!(
                "{amount_msats} msats outside receivable range [{}, {}]",
                range.min, range.max
            ),
        )
        .with_field("amount"))
    }
}

/// LNURL metadata: a JSON array of `[mime, content]` pairs.
fn lnurl_metadata(receiver: &str) -> String {
    serde_json::json!([
        ["text/plain", format!("Pay to {receiver}")],
        ["text/identifier", receiver],
    ])
    .to_string()
}
