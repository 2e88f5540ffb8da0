//! Configuration shared by the sending and receiving orchestrators.

use std::time::Duration;

use crate::keys::{PubKeyResponse, VaspSigningKey};
use crate::proto::UmaVersion;
use crate::timestamp::UnixTimestamp;

/// Who this VASP is: its domain and signing key.
#[derive(Debug, Clone)]
pub struct VaspIdentity {
    domain: String,
    signing_key: VaspSigningKey,
    encryption_pub_key: String,
    keys_expire_at: Option<UnixTimestamp>,
}

impl VaspIdentity {
    /// Creates an identity whose encryption key defaults to the signing key.
    #[must_use]
    pub fn new(domain: impl Into<String>, signing_key: VaspSigningKey) -> Self {
        let encryption_pub_key = signing_key.public_key_hex();
        Self {
            domain: domain.into(),
            signing_key,
            encryption_pub_key,
            keys_expire_at: None,
        }
    }

    /// Sets the published encryption key (SEC1 hex).
    #[must_use]
    pub fn with_encryption_pub_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_pub_key = key.into();
        self
    }

    /// Sets the advertised key expiry.
    #[must_use]
    pub const fn with_keys_expire_at(mut self, expiry: UnixTimestamp) -> Self {
        self.keys_expire_at = Some(expiry);
        self
    }

    /// Domain counterparties know this VASP by.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Signing key.
    #[must_use]
    pub const fn signing_key(&self) -> &VaspSigningKey {
        &self.signing_key
    }

    /// Bundle served at `/.well-known/lnurlpubkey`.
    #[must_use]
    pub fn pub_key_response(&self) -> PubKeyResponse {
        PubKeyResponse {
            signing_pub_key: self.signing_key.public_key_hex(),
            encryption_pub_key: self.encryption_pub_key.clone(),
            expiration_timestamp: self.keys_expire_at,
        }
    }

    /// `http` for localhost, `https` otherwise.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        crate::proto::scheme_for_domain(&self.domain)
    }

    /// Base URL of this VASP, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.domain)
    }
}

/// Tunables of the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Deadline for each counterparty round trip.
    pub step_timeout: Duration,
    /// Version offered in outgoing requests.
    pub uma_version: UmaVersion,
    /// Whether this VASP is bound by the travel rule.
    pub is_subject_to_travel_rule: bool,
    /// Lifetime of created invoices.
    pub invoice_expiry: Duration,
    /// Fees added on top of converted amounts, in millisatoshis.
    pub exchange_fees_msats: u64,
    /// Public key of this VASP's Lightning node.
    pub node_pub_key: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            step_timeout: Self::DEFAULT_STEP_TIMEOUT,
            uma_version: UmaVersion::CURRENT,
            is_subject_to_travel_rule: true,
            invoice_expiry: Self::DEFAULT_INVOICE_EXPIRY,
            exchange_fees_msats: 0,
            node_pub_key: None,
        }
    }
}

impl HandshakeConfig {
    /// Default deadline per round trip.
    pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default invoice lifetime.
    pub const DEFAULT_INVOICE_EXPIRY: Duration = Duration::from_secs(180);

    /// Sets the per-step deadline.
    #[must_use]
    pub const fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Sets the offered protocol version.
    #[must_use]
    pub const fn with_uma_version(mut self, version: UmaVersion) -> Self {
        self.uma_version = version;
        self
    }

    /// Sets the travel-rule flag.
    #[must_use]
    pub const fn with_travel_rule(mut self, is_subject: bool) -> Self {
        self.is_subject_to_travel_rule = is_subject;
        self
    }

    /// Sets the invoice lifetime.
    #[must_use]
    pub const fn with_invoice_expiry(mut self, expiry: Duration) -> Self {
        self.invoice_expiry = expiry;
        self
    }

    /// Sets the exchange fees.
    #[must_use]
    pub const fn with_exchange_fees_msats(mut self, fees: u64) -> Self {
        self.exchange_fees_msats = fees;
        self
    }

    /// Sets the Lightning node key.
    #[must_use]
    pub fn with_node_pub_key(mut self, key: impl Into<String>) -> Self {
        self.node_pub_key = Some(key.into());
        self
    }
}
