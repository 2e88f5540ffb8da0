use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::{
    HandshakeState, KeyResolver, audit_failure, bounded, check_nonce, rejected, service_failure,
    within,
};
use crate::config::{HandshakeConfig, VaspIdentity};
use crate::currency::CurrencyError;
use crate::error::{FailureReason, UmaError};
use crate::keys::generate_nonce;
use crate::nonce::NonceValidator;
use crate::proto::{
    CompliancePayerData, LnurlpRequest, LnurlpResponse, PayReqResponse, PayRequest, PayerData,
    SignedMessage, UmaAddress, UmaMessage,
};
use crate::proto::payreq::UTXO_CALLBACK_PATH;
use crate::services::{
    ComplianceService, InternalLedgerService, LedgerEntry, LightningPayer, OutgoingPayment,
    PayInvoiceError, PaymentDirection, PreScreenRequest, User,
};
use crate::timestamp::UnixTimestamp;
use crate::transport::CounterpartyTransport;

/// The sending side of UMA: shared dependencies for outgoing handshakes.
#[derive(Debug)]
pub struct SendingVasp {
    identity: VaspIdentity,
    keys: KeyResolver,
    nonces: Arc<dyn NonceValidator>,
    transport: Arc<dyn CounterpartyTransport>,
    compliance: Arc<dyn ComplianceService>,
    ledger: Option<Arc<dyn InternalLedgerService>>,
    config: HandshakeConfig,
}

impl SendingVasp {
    /// Creates a sending VASP with the default [`HandshakeConfig`].
    #[must_use]
    pub fn new(
        identity: VaspIdentity,
        keys: KeyResolver,
        nonces: Arc<dyn NonceValidator>,
        transport: Arc<dyn CounterpartyTransport>,
        compliance: Arc<dyn ComplianceService>,
    ) -> Self {
        Self {
            identity,
            keys,
            nonces,
            transport,
            compliance,
            ledger: None,
            config: HandshakeConfig::default(),
        }
    }

    /// Replaces the handshake configuration.
    #[must_use]
    pub fn with_config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    /// Books outgoing payments in `ledger`.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn InternalLedgerService>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// This VASP's identity.
    #[must_use]
    pub const fn identity(&self) -> &VaspIdentity {
        &self.identity
    }

    /// Starts a handshake paying `receiver` on behalf of `payer`.
    ///
    /// Nothing is sent until [`SendingHandshake::lookup`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::MalformedMessage`] if either address is invalid.
    pub fn start_handshake(
        self: &Arc<Self>,
        payer: User,
        receiver: &str,
        cancel: CancellationToken,
    ) -> Result<SendingHandshake, UmaError> {
        let receiver = UmaAddress::parse(receiver)
            .map_err(|e| UmaError::malformed("receiverAddress", e.to_string()))?;
        let payer_address = UmaAddress::parse(&payer.uma_address(self.identity.domain()))
            .map_err(|e| UmaError::malformed("payer", e.to_string()))?;
        Ok(SendingHandshake {
            vasp: Arc::clone(self),
            payer,
            payer_address,
            receiver,
            cancel,
            state: HandshakeState::Idle,
            transcript: Vec::new(),
            lnurlp_response: None,
            invoice: None,
            ledger_entry: None,
        })
    }
}

/// One outgoing payment negotiation.
///
/// Drive it with [`lookup`](Self::lookup), then
/// [`request_invoice`](Self::request_invoice), then optionally
/// [`pay`](Self::pay). Calling a step out of order fails with
/// [`FailureReason::InvalidState`] and leaves the state untouched; any other
/// failure moves the handshake to [`HandshakeState::Failed`].
#[derive(Debug)]
pub struct SendingHandshake {
    vasp: Arc<SendingVasp>,
    payer: User,
    payer_address: UmaAddress,
    receiver: UmaAddress,
    cancel: CancellationToken,
    state: HandshakeState,
    transcript: Vec<UmaMessage>,
    lnurlp_response: Option<LnurlpResponse>,
    invoice: Option<PayReqResponse>,
    ledger_entry: Option<LedgerEntry>,
}

impl SendingHandshake {
    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Messages sent and verified so far, in order.
    #[must_use]
    pub fn transcript(&self) -> &[UmaMessage] {
        &self.transcript
    }

    /// Receiver being paid.
    #[must_use]
    pub const fn receiver(&self) -> &UmaAddress {
        &self.receiver
    }

    /// The verified LNURLp response, once [`lookup`](Self::lookup) succeeded.
    #[must_use]
    pub const fn lnurlp_response(&self) -> Option<&LnurlpResponse> {
        self.lnurlp_response.as_ref()
    }

    /// The verified invoice, once the handshake settled.
    #[must_use]
    pub const fn invoice(&self) -> Option<&PayReqResponse> {
        self.invoice.as_ref()
    }

    /// Discovers the receiver and verifies its signed LNURLp response.
    ///
    /// # Errors
    ///
    /// Returns the failure that moved the handshake to
    /// [`HandshakeState::Failed`], or [`FailureReason::InvalidState`] if the
    /// handshake already started.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "uma.send.lookup", skip(self), fields(receiver = %self.receiver))
    )]
    pub async fn lookup(&mut self) -> Result<&LnurlpResponse, UmaError> {
        if self.state != HandshakeState::Idle {
            return Err(self.out_of_order("lookup"));
        }
        match self.run_lookup().await {
            Ok(response) => Ok(&*self.lnurlp_response.insert(response)),
            Err(err) => Err(self.fail(err, "lookup")),
        }
    }

    async fn run_lookup(&mut self) -> Result<LnurlpResponse, UmaError> {
        let vasp = Arc::clone(&self.vasp);
        let receiver_domain = self.receiver.domain().to_owned();

        let allowed = self
            .step(
                "receiving vasp screening",
                async {
                    vasp.compliance
                        .should_accept_transaction_to_vasp(
                            &receiver_domain,
                            &self.payer_address,
                            &self.receiver,
                        )
                        .await
                        .map_err(|e| service_failure(&e))
                },
            )
            .await?;
        if !allowed {
            return Err(rejected(format!(
                "payments to {receiver_domain} are not allowed"
            )));
        }

        self.state = HandshakeState::AwaitingPubKey;
        self.step("key discovery", vasp.keys.resolve(&receiver_domain))
            .await?;

        let mut request = LnurlpRequest::new(
            self.receiver.clone(),
            vasp.identity.domain(),
            generate_nonce(),
            UnixTimestamp::now(),
        )
        .with_travel_rule(vasp.config.is_subject_to_travel_rule)
        .with_version(vasp.config.uma_version);
        request.sign_with(vasp.identity.signing_key());
        let url = request.encode_to_url()?;
        self.state = HandshakeState::AwaitingLnurlpResponse;
        self.transcript.push(request.into());

        let body = self
            .step("lnurlp request", async {
                vasp.transport
                    .send_lnurlp_request(&url)
                    .await
                    .map_err(|e| e.into_uma_error(FailureReason::RequestFailed))
            })
            .await?;

        let response = LnurlpResponse::parse(&body)?;
        if !response.uma_version.is_supported() {
            return Err(UmaError::new(
                FailureReason::UnsupportedVersion,
                format!("receiver chose unsupported version {}", response.uma_version),
            )
            .with_field("umaVersion"));
        }
        if response.compliance.receiver_identifier != self.receiver.as_str() {
            return Err(UmaError::malformed(
                "compliance.receiverIdentifier",
                format!(
                    "response is for {}, expected {}",
                    response.compliance.receiver_identifier, self.receiver
                ),
            ));
        }
        self.step("lnurlp response verification", vasp.keys.verify(&response))
            .await?;
        check_nonce(vasp.nonces.as_ref(), &response).await?;

        self.transcript.push(response.clone().into());
        Ok(response)
    }

    /// Requests an invoice for `amount` of `currency_code`, in the currency's
    /// smallest unit, and verifies the receiver's signed answer.
    ///
    /// # Errors
    ///
    /// Returns the failure that moved the handshake to
    /// [`HandshakeState::Failed`], or [`FailureReason::InvalidState`] if
    /// [`lookup`](Self::lookup) has not succeeded.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "uma.send.request_invoice", skip(self), fields(receiver = %self.receiver))
    )]
    pub async fn request_invoice(
        &mut self,
        currency_code: &str,
        amount: u64,
    ) -> Result<&PayReqResponse, UmaError> {
        let offer = match (&self.state, &self.lnurlp_response) {
            (HandshakeState::AwaitingLnurlpResponse, Some(offer)) => offer.clone(),
            _ => return Err(self.out_of_order("request_invoice")),
        };
        match self.run_request_invoice(&offer, currency_code, amount).await {
            Ok(invoice) => Ok(&*self.invoice.insert(invoice)),
            Err(err) => Err(self.fail(err, "request_invoice")),
        }
    }

    async fn run_request_invoice(
        &mut self,
        offer: &LnurlpResponse,
        currency_code: &str,
        amount: u64,
    ) -> Result<PayReqResponse, UmaError> {
        let vasp = Arc::clone(&self.vasp);

        let currency = offer.currency(currency_code).ok_or_else(|| {
            UmaError::new(
                FailureReason::UnsupportedCurrency,
                format!("{} does not accept {currency_code}", self.receiver),
            )
            .with_field("currency")
        })?;
        currency.check_amount(amount).map_err(amount_out_of_range)?;
        let amount_msats = currency.to_msats(amount).map_err(amount_out_of_range)?;
        if !(offer.min_sendable..=offer.max_sendable).contains(&amount_msats) {
            return Err(UmaError::new(
                FailureReason::CurrencyOutOfRange,
                format!(
                    "{amount_msats} msats outside receivable range [{}, {}]",
                    offer.min_sendable, offer.max_sendable
                ),
            )
            .with_field("amount"));
        }

        let decision = self
            .step("outgoing screening", async {
                vasp.compliance
                    .screen_outgoing_transaction(
                        &self.payer.id,
                        &self.payer_address,
                        &self.receiver,
                        amount_msats,
                    )
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await?;
        if !decision.accepted {
            return Err(rejected(format!(
                "payment of {amount_msats} msats to {} was refused",
                self.receiver
            )));
        }

        let mut request = PayRequest {
            currency: currency_code.to_owned(),
            amount,
            payer_data: PayerData {
                identifier: self.payer_address.to_string(),
                name: self.payer.name.clone(),
                email: self.payer.email.clone(),
                compliance: CompliancePayerData {
                    utxos: Vec::new(),
                    node_pub_key: vasp.config.node_pub_key.clone(),
                    kyc_status: self.payer.kyc_status.clone(),
                    travel_rule_info: decision.travel_rule_info,
                    signature: String::new(),
                    signature_nonce: generate_nonce(),
                    signature_timestamp: UnixTimestamp::now(),
                    utxo_callback: format!("{}{UTXO_CALLBACK_PATH}", vasp.identity.base_url()),
                },
            },
        };
        request.sign_with(vasp.identity.signing_key());
        let body = serde_json::to_vec(&request)
            .map_err(|e| UmaError::new(FailureReason::Internal, e.to_string()))?;
        self.state = HandshakeState::AwaitingPayReqResponse;
        self.transcript.push(request.into());

        let raw = self
            .step("pay request", async {
                vasp.transport
                    .send_pay_request(&offer.callback, body)
                    .await
                    .map_err(|e| e.into_uma_error(FailureReason::RequestFailed))
            })
            .await?;

        let invoice = PayReqResponse::parse(&raw)?;
        if invoice.compliance.payee_identifier != self.receiver.as_str() {
            return Err(UmaError::malformed(
                "compliance.payeeIdentifier",
                format!(
                    "invoice is for {}, expected {}",
                    invoice.compliance.payee_identifier, self.receiver
                ),
            ));
        }
        self.step("invoice verification", vasp.keys.verify(&invoice))
            .await?;
        check_nonce(vasp.nonces.as_ref(), &invoice).await?;
        if invoice.payment_info.currency_code != currency_code {
            return Err(UmaError::malformed(
                "paymentInfo.currencyCode",
                format!(
                    "invoice settles in {}, requested {currency_code}",
                    invoice.payment_info.currency_code
                ),
            ));
        }

        let invoice_msats = invoice.expected_msats(amount).ok_or_else(|| {
            UmaError::new(FailureReason::CurrencyOutOfRange, "invoice amount overflows")
                .with_field("paymentInfo.multiplier")
        })?;
        let screened = self
            .step("transaction screening", async {
                vasp.compliance
                    .pre_screen_transaction(&PreScreenRequest {
                        sending_uma: self.payer_address.as_str(),
                        receiving_uma: self.receiver.as_str(),
                        amount_msats: invoice_msats,
                        counterparty_node_id: invoice.compliance.node_pub_key.as_deref(),
                        counterparty_utxos: &invoice.compliance.utxos,
                    })
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await?;
        if !screened {
            return Err(rejected(format!(
                "transaction to {} failed pre-screening",
                self.receiver
            )));
        }

        self.ledger_entry = Some(LedgerEntry {
            user_id: self.payer.id.clone(),
            receiving_uma: self.receiver.to_string(),
            amount_msats: invoice_msats,
            amount,
            currency_code: currency_code.to_owned(),
        });
        self.transcript.push(invoice.clone().into());
        self.state = HandshakeState::Settled;
        Ok(invoice)
    }

    /// Pays the settled invoice, then books the payment in the ledger and
    /// hands it to transaction monitoring.
    ///
    /// The invoice is paid at most once. Once the ledger has recorded the
    /// attempt, the invoice is consumed whatever the outcome, and later calls
    /// fail with [`FailureReason::InvalidState`]. The handshake stays
    /// [`HandshakeState::Settled`]. Bookkeeping after the payment went out is
    /// bounded by the step timeout but not cancelled, and its failures are
    /// logged rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::InvoiceExpired`] if the invoice can no longer
    /// be paid, [`FailureReason::RequestFailed`] if the payment failed,
    /// [`FailureReason::Internal`] if the ledger refused the attempt, or
    /// [`FailureReason::InvalidState`] if there is no unpaid invoice.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "uma.send.pay", skip(self, lightning), fields(receiver = %self.receiver))
    )]
    pub async fn pay(&mut self, lightning: &dyn LightningPayer) -> Result<OutgoingPayment, UmaError> {
        let (Some(invoice), Some(entry)) = (self.invoice.clone(), self.ledger_entry.clone()) else {
            if self.invoice.is_some() {
                return Err(UmaError::new(
                    FailureReason::InvalidState,
                    "the invoice was already paid",
                ));
            }
            return Err(self.out_of_order("pay"));
        };
        if let Some(ledger) = &self.vasp.ledger {
            self.step("ledger begin", async {
                ledger
                    .record_outgoing_transaction_began(&entry)
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await
            .inspect_err(|e| audit_failure(e, "pay", self.receiver.domain()))?;
        }
        self.ledger_entry = None;
        self.run_pay(lightning, &invoice, &entry)
            .await
            .inspect_err(|e| audit_failure(e, "pay", self.receiver.domain()))
    }

    async fn run_pay(
        &self,
        lightning: &dyn LightningPayer,
        invoice: &PayReqResponse,
        entry: &LedgerEntry,
    ) -> Result<OutgoingPayment, UmaError> {
        let vasp = &self.vasp;
        let timeout = vasp.config.step_timeout;

        let paid = self
            .step("invoice payment", async {
                lightning
                    .pay_invoice(&invoice.encoded_invoice)
                    .await
                    .map_err(|e| match e {
                        PayInvoiceError::Expired => {
                            UmaError::new(FailureReason::InvoiceExpired, e.to_string())
                                .with_field("pr")
                        }
                        PayInvoiceError::Failed(_) => {
                            UmaError::new(FailureReason::RequestFailed, e.to_string())
                        }
                    })
            })
            .await;
        let payment = match paid {
            Ok(payment) => payment,
            Err(err) => {
                if let Some(ledger) = &vasp.ledger {
                    let booked = within(timeout, "ledger failure", async {
                        ledger
                            .record_outgoing_transaction_failed(entry, err.message())
                            .await
                            .map_err(|e| service_failure(&e))
                    })
                    .await;
                    self.log_bookkeeping_failure(&booked, "ledger failure");
                }
                return Err(err);
            }
        };

        if let Some(ledger) = &vasp.ledger {
            let booked = within(timeout, "ledger success", async {
                ledger
                    .record_outgoing_transaction_succeeded(entry, &payment.payment_id)
                    .await
                    .map_err(|e| service_failure(&e))
            })
            .await;
            self.log_bookkeeping_failure(&booked, "ledger success");
        }
        let monitored = within(timeout, "transaction monitoring", async {
            vasp.compliance
                .register_transaction_monitoring(
                    &payment.payment_id,
                    invoice.compliance.node_pub_key.as_deref(),
                    PaymentDirection::Sent,
                    &payment.utxos_with_amounts,
                )
                .await
                .map_err(|e| service_failure(&e))
        })
        .await;
        self.log_bookkeeping_failure(&monitored, "transaction monitoring");
        Ok(payment)
    }

    fn log_bookkeeping_failure(&self, result: &Result<(), UmaError>, step: &'static str) {
        if let Err(err) = result {
            audit_failure(err, step, self.receiver.domain());
        }
    }

    async fn step<T, F>(&self, name: &'static str, fut: F) -> Result<T, UmaError>
    where
        F: Future<Output = Result<T, UmaError>> + Send,
        T: Send,
    {
        bounded(&self.cancel, self.vasp.config.step_timeout, name, fut).await
    }

    fn fail(&mut self, err: UmaError, step: &'static str) -> UmaError {
        audit_failure(&err, step, self.receiver.domain());
        self.state = HandshakeState::Failed(err.clone());
        err
    }

    fn out_of_order(&self, step: &'static str) -> UmaError {
        UmaError::new(
            FailureReason::InvalidState,
            format!("cannot {step} in state {:?}", self.state),
        )
    }
}

fn amount_out_of_range(err: CurrencyError) -> UmaError {
    UmaError::new(FailureReason::CurrencyOutOfRange, err.to_string()).with_field("amount")
}
