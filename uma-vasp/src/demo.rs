//! In-memory capabilities backing the server.
//!
//! Users and currencies come from [`VaspConfig`]. Compliance accepts every
//! counterparty not on the configured block list. Invoices are placeholders
//! that identify the requested amount but are not payable on any network,
//! which is enough to exercise the handshake against a real sender.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uma::currency::Currency;
use uma::proto::UmaAddress;
use uma::services::{
    ComplianceDecision, ComplianceService, InvoiceCreator, MsatsRange, PaymentDirection, PreScreenRequest,
    ServiceError, User, UserService, UtxoWithAmount,
};

use crate::config::{ConfigError, UserConfig, VaspConfig};

#[derive(Debug)]
struct Account {
    user: User,
    currencies: Vec<Currency>,
    receivable: MsatsRange,
}

/// [`UserService`] over the configured users.
#[derive(Debug, Default)]
pub struct ConfiguredUsers {
    by_id: HashMap<String, Account>,
    ids_by_name: HashMap<String, String>,
}

impl ConfiguredUsers {
    /// Indexes the users of `config`.
    ///
    /// User names match case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a user names an unknown currency or has an
    /// inverted receivable range.
    pub fn from_config(config: &VaspConfig) -> Result<Self, ConfigError> {
        let mut users = Self::default();
        for entry in &config.users {
            let account = account(entry, &config.currencies)?;
            users
                .ids_by_name
                .insert(entry.user.uma_user_name.to_lowercase(), entry.user.id.clone());
            users.by_id.insert(entry.user.id.clone(), account);
        }
        Ok(users)
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no user is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn account(&self, user_id: &str) -> Result<&Account, ServiceError> {
        self.by_id
            .get(user_id)
            .ok_or_else(|| ServiceError::new("users", format!("no user with id {user_id}")))
    }
}

fn account(entry: &UserConfig, offered: &[Currency]) -> Result<Account, ConfigError> {
    let receivable = entry.receivable();
    if receivable.min > receivable.max {
        return Err(ConfigError::InvertedReceivableRange {
            user: entry.user.id.clone(),
        });
    }
    let currencies = if entry.currencies.is_empty() {
        offered.to_vec()
    } else {
        entry
            .currencies
            .iter()
            .map(|code| {
                offered
                    .iter()
                    .find(|c| c.code() == code)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownCurrency {
                        user: entry.user.id.clone(),
                        code: code.clone(),
                    })
            })
            .collect::<Result<_, _>>()?
    };
    Ok(Account {
        user: entry.user.clone(),
        currencies,
        receivable,
    })
}

#[async_trait::async_trait]
impl UserService for ConfiguredUsers {
    async fn get_user_by_uma(&self, uma_user_name: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .ids_by_name
            .get(&uma_user_name.to_lowercase())
            .and_then(|id| self.by_id.get(id))
            .map(|account| account.user.clone()))
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.by_id.get(user_id).map(|account| account.user.clone()))
    }

    async fn get_currency_preferences_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Currency>, ServiceError> {
        Ok(self.account(user_id)?.currencies.clone())
    }

    async fn get_receivable_msats_range_for_user(
        &self,
        user_id: &str,
    ) -> Result<MsatsRange, ServiceError> {
        Ok(self.account(user_id)?.receivable)
    }
}

/// [`ComplianceService`] that refuses only blocked VASP domains.
#[derive(Debug, Default)]
pub struct BlockListCompliance {
    blocked: HashSet<String>,
}

impl BlockListCompliance {
    /// Blocks every domain in `domains`, compared case-insensitively.
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: domains
                .into_iter()
                .map(|d| d.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn allows(&self, domain: &str) -> bool {
        let allowed = !self.blocked.contains(&domain.to_lowercase());
        if !allowed {
            tracing::warn!(domain, "refusing blocked VASP");
        }
        allowed
    }
}

#[async_trait::async_trait]
impl ComplianceService for BlockListCompliance {
    async fn should_accept_transaction_from_vasp(
        &self,
        sending_vasp_domain: &str,
        _receiving_uma: &UmaAddress,
    ) -> Result<bool, ServiceError> {
        Ok(self.allows(sending_vasp_domain))
    }

    async fn should_accept_transaction_to_vasp(
        &self,
        receiving_vasp_domain: &str,
        _sending_uma: &UmaAddress,
        _receiving_uma: &UmaAddress,
    ) -> Result<bool, ServiceError> {
        Ok(self.allows(receiving_vasp_domain))
    }

    async fn pre_screen_transaction(
        &self,
        request: &PreScreenRequest<'_>,
    ) -> Result<bool, ServiceError> {
        tracing::info!(
            sender = request.sending_uma,
            receiver = request.receiving_uma,
            amount_msats = request.amount_msats,
            "pre-screened transaction"
        );
        Ok(true)
    }

    async fn register_transaction_monitoring(
        &self,
        payment_id: &str,
        node_pub_key: Option<&str>,
        direction: PaymentDirection,
        utxos_with_amounts: &[UtxoWithAmount],
    ) -> Result<(), ServiceError> {
        tracing::info!(
            payment_id,
            node_pub_key,
            ?direction,
            utxos = utxos_with_amounts.len(),
            "registered transaction for monitoring"
        );
        Ok(())
    }

    async fn screen_outgoing_transaction(
        &self,
        _sending_user_id: &str,
        _sending_uma: &UmaAddress,
        receiving_uma: &UmaAddress,
        _amount_msats: u64,
    ) -> Result<ComplianceDecision, ServiceError> {
        if self.allows(receiving_uma.domain()) {
            Ok(ComplianceDecision::accept(None))
        } else {
            Ok(ComplianceDecision::reject())
        }
    }
}

/// [`InvoiceCreator`] issuing non-payable placeholder invoices.
#[derive(Debug, Default)]
pub struct PlaceholderInvoices {
    issued: AtomicU64,
}

impl PlaceholderInvoices {
    /// Number of invoices issued so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl InvoiceCreator for PlaceholderInvoices {
    async fn create_invoice(
        &self,
        amount_msats: u64,
        metadata: &str,
        expiry: Duration,
    ) -> Result<String, ServiceError> {
        let serial = self.issued.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            amount_msats,
            expiry_secs = expiry.as_secs(),
            metadata_len = metadata.len(),
            serial,
            "issued placeholder invoice"
        );
        Ok(format!("lnbcrt{amount_msats}msat1placeholder{serial:08x}"))
    }
}
