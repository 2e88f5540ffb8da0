//! The UMA handshake state machine.
//!
//! [`SendingHandshake`] drives one payment from the sender's side through
//!
//! ```text
//! Idle -> AwaitingPubKey -> AwaitingLnurlpResponse -> AwaitingPayReqResponse -> Settled
//! ```
//!
//! with [`HandshakeState::Failed`] reachable from every non-terminal state.
//! [`ReceivingVasp`] answers the two inbound messages statelessly; the only
//! state shared between handshakes is the public key cache and the nonce store.
//!
//! Every inbound signed message is processed in the same order: strict parse,
//! key resolution, signature verification (with one key-rotation retry),
//! nonce check, compliance, and only then side effects. Every capability call
//! is bounded by the step timeout and stops when the cancellation token fires.

mod receiver;
mod sender;


use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
#[cfg(feature = "telemetry")]
use tracing::instrument;

pub use receiver::ReceivingVasp;
pub use sender::{SendingHandshake, SendingVasp};

use crate::error::{FailureReason, UmaError};
use crate::keys::PubKeyResponse;
use crate::nonce::NonceValidator;
use crate::proto::SignedMessage;
use crate::pubkey_cache::PublicKeyCache;
use crate::services::ServiceError;
use crate::timestamp::UnixTimestamp;
use crate::transport::CounterpartyTransport;

/// Position of a handshake in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet.
    Idle,
    /// Discovering the receiver's public keys.
    AwaitingPubKey,
    /// LNURLp request sent; the verified response waits for currency selection.
    AwaitingLnurlpResponse,
    /// PayRequest sent.
    AwaitingPayReqResponse,
    /// A verified invoice is available.
    Settled,
    /// The handshake stopped.
    Failed(UmaError),
}

impl HandshakeState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed(_))
    }

    /// The failure, if the handshake failed.
    #[must_use]
    pub const fn failure(&self) -> Option<&UmaError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Resolves counterparty keys through the cache, falling back to discovery.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    cache: Arc<dyn PublicKeyCache>,
    transport: Arc<dyn CounterpartyTransport>,
    timeout: Duration,
}

impl KeyResolver {
    /// Creates a resolver whose discovery round trips are bounded by `timeout`.
    #[must_use]
    pub fn new(
        cache: Arc<dyn PublicKeyCache>,
        transport: Arc<dyn CounterpartyTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            transport,
            timeout,
        }
    }

    /// Returns the cached bundle for `domain`, discovering it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::KeyDiscoveryFailed`] or
    /// [`FailureReason::Timeout`] when discovery fails.
    pub async fn resolve(&self, domain: &str) -> Result<PubKeyResponse, UmaError> {
        match self.cache.fetch_public_key_for_vasp(domain) {
            Some(bundle) => Ok(bundle),
            None => self.discover(domain).await,
        }
    }

    /// Fetches `domain`'s keys from the network and caches them.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::KeyDiscoveryFailed`] when the counterparty
    /// serves no usable, unexpired signing key, or [`FailureReason::Timeout`].
    #[cfg_attr(feature = "telemetry", instrument(name = "uma.keys.discover", skip(self)))]
    pub async fn discover(&self, domain: &str) -> Result<PubKeyResponse, UmaError> {
        let fetched = tokio::time::timeout(self.timeout, self.transport.fetch_public_keys(domain))
            .await
            .map_err(|_| {
                UmaError::new(FailureReason::Timeout, format!("key discovery for {domain} timed out"))
            })?
            .map_err(|e| e.into_uma_error(FailureReason::KeyDiscoveryFailed))?;

        if let Err(e) = fetched.signing_key() {
            return Err(UmaError::new(
                FailureReason::KeyDiscoveryFailed,
                format!("{domain} published an unusable signing key: {e}"),
            )
            .with_field("signingPubKey"));
        }
        if !fetched.is_valid_at(UnixTimestamp::now()) {
            return Err(UmaError::new(
                FailureReason::KeyDiscoveryFailed,
                format!("{domain} published already expired keys"),
            )
            .with_field("expirationTimestamp"));
        }
        self.cache.add_public_key_for_vasp(domain, fetched.clone());
        Ok(fetched)
    }

    /// Verifies `message` against its signer's key.
    ///
    /// A failure against a cached key invalidates the cache entry and retries
    /// once with freshly discovered keys. A second failure is final.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::SignatureInvalid`], or a discovery failure.
    pub async fn verify<M>(&self, message: &M) -> Result<(), UmaError>
    where
        M: SignedMessage + Sync,
    {
        let domain = message.signer_domain();
        if let Some(cached) = self.cache.fetch_public_key_for_vasp(domain) {
            if verifies(message, &cached) {
                return Ok(());
            }
            #[cfg(feature = "telemetry")]
            tracing::warn!(domain, "signature rejected by cached key, re-discovering");
            self.cache.remove_public_key_for_vasp(domain);
        }
        let fresh = self.discover(domain).await?;
        if verifies(message, &fresh) {
            Ok(())
        } else {
            Err(UmaError::new(
                FailureReason::SignatureInvalid,
                format!("signature does not verify against keys of {domain}"),
            )
            .with_field("signature"))
        }
    }
}

fn verifies<M: SignedMessage + ?Sized>(message: &M, bundle: &PubKeyResponse) -> bool {
    bundle
        .signing_key()
        .is_ok_and(|key| message.verify_with(&key))
}

/// Records `message`'s nonce, rejecting replays.
async fn check_nonce<M>(validator: &dyn NonceValidator, message: &M) -> Result<(), UmaError>
where
    M: SignedMessage + Sync,
{
    if validator
        .check_and_save_nonce(message.nonce(), message.timestamp())
        .await
    {
        Ok(())
    } else {
        Err(UmaError::new(
            FailureReason::NonceReplay,
            format!("nonce {} from {} was already used", message.nonce(), message.signer_domain()),
        )
        .with_field("nonce"))
    }
}

/// Runs one round trip or capability call under a deadline and a
/// cancellation token.
async fn bounded<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    step: &'static str,
    fut: F,
) -> Result<T, UmaError>
where
    F: Future<Output = Result<T, UmaError>> + Send,
    T: Send,
{
    if cancel.is_cancelled() {
        return Err(cancelled(step));
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(cancelled(step)),
        res = within(timeout, step, fut) => res,
    }
}

/// Runs `fut` under a deadline only.
async fn within<T, F>(timeout: Duration, step: &'static str, fut: F) -> Result<T, UmaError>
where
    F: Future<Output = Result<T, UmaError>> + Send,
    T: Send,
{
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(UmaError::new(FailureReason::Timeout, format!("{step} timed out after {timeout:?}")))
    })
}

fn cancelled(step: &'static str) -> UmaError {
    UmaError::new(FailureReason::Cancelled, format!("cancelled during {step}"))
}

fn service_failure(err: &ServiceError) -> UmaError {
    UmaError::new(FailureReason::Internal, err.to_string())
}

fn rejected(message: impl Into<String>) -> UmaError {
    UmaError::new(FailureReason::ComplianceRejected, message)
}

/// Emits the audit record of a failed step.
#[allow(unused_variables)]
fn audit_failure(err: &UmaError, step: &'static str, counterparty: &str) {
    #[cfg(feature = "telemetry")]
    tracing::warn!(
        reason = %err.reason(),
        field = err.field().unwrap_or_default(),
        counterparty,
        step,
        "uma handshake step failed: {}",
        err.message()
    );
}
