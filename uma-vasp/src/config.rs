//! Receiving VASP server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion. Variables use `$VAR` or `${VAR}` syntax and are expanded in the
//! raw file before it is parsed.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! domain = "vasp.example.com"
//! signing_private_key = "$UMA_SIGNING_KEY"
//! webhook_secret = "${WEBHOOK_SECRET}"
//!
//! [[currencies]]
//! code = "SAT"
//! name = "Satoshis"
//! symbol = "SAT"
//! multiplier = 1000
//! minSendable = 1
//! maxSendable = 100000000
//!
//! [[users]]
//! id = "1"
//! uma_user_name = "bob"
//! kyc_status = "VERIFIED"
//! currencies = ["SAT"]
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - Keys and secrets referenced by `$VAR` in the config file

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uma::config::{HandshakeConfig, VaspIdentity};
use uma::currency::Currency;
use uma::keys::{KeyError, VaspSigningKey};
use uma::services::{MsatsRange, User};
use uma::timestamp::UnixTimestamp;

/// Failure loading the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Configuration file path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// The signing key is missing or still references an unset variable.
    #[error("signing_private_key is not set (missing env var?)")]
    MissingSigningKey,
    /// The signing key does not decode.
    #[error("invalid signing_private_key: {0}")]
    SigningKey(#[from] KeyError),
    /// A user lists a currency that is not configured.
    #[error("user {user} accepts unknown currency {code}")]
    UnknownCurrency {
        /// Offending user id.
        user: String,
        /// Currency code.
        code: String,
    },
    /// A user's receivable range is inverted.
    #[error("user {user} has min_receivable_msats above max_receivable_msats")]
    InvertedReceivableRange {
        /// Offending user id.
        user: String,
    },
}

/// Top-level receiving VASP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaspConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8080`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Domain counterparties reach this VASP at (default: `localhost:{port}`).
    #[serde(default)]
    pub domain: Option<String>,

    /// secp256k1 signing key, hex. Supports `$VAR` / `${VAR}`.
    #[serde(default)]
    pub signing_private_key: String,

    /// Published encryption key, SEC1 hex (default: the signing public key).
    #[serde(default)]
    pub encryption_pub_key: Option<String>,

    /// How long published keys stay valid after startup. Unset publishes no expiry.
    #[serde(default)]
    pub keys_valid_secs: Option<u64>,

    /// Retention of seen nonces, and the period of the purge task.
    #[serde(default = "default_nonce_retention_secs")]
    pub nonce_retention_secs: u64,

    /// Lifetime of created invoices.
    #[serde(default = "default_invoice_expiry_secs")]
    pub invoice_expiry_secs: u64,

    /// Deadline for key discovery round trips.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Fees added to every converted amount, in millisatoshis.
    #[serde(default)]
    pub receiver_fees_msats: u64,

    /// Whether this VASP is bound by the travel rule.
    #[serde(default = "default_travel_rule")]
    pub is_subject_to_travel_rule: bool,

    /// Public key of the Lightning node invoices are issued from.
    #[serde(default)]
    pub node_pub_key: Option<String>,

    /// Shared secret of node operator webhooks. Webhooks are refused when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// VASP domains this VASP refuses to transact with.
    #[serde(default)]
    pub blocked_vasp_domains: Vec<String>,

    /// Currencies offered to senders.
    #[serde(default)]
    pub currencies: Vec<Currency>,

    /// Users that can receive payments.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// A user that can receive payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// User record.
    #[serde(flatten)]
    pub user: User,

    /// Accepted currency codes in preference order (default: every configured currency).
    #[serde(default)]
    pub currencies: Vec<String>,

    /// Smallest receivable amount in millisatoshis.
    #[serde(default = "default_min_receivable_msats")]
    pub min_receivable_msats: u64,

    /// Largest receivable amount in millisatoshis.
    #[serde(default = "default_max_receivable_msats")]
    pub max_receivable_msats: u64,
}

impl UserConfig {
    /// Receivable range of the user.
    #[must_use]
    pub const fn receivable(&self) -> MsatsRange {
        MsatsRange {
            min: self.min_receivable_msats,
            max: self.max_receivable_msats,
        }
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8080
}

const fn default_nonce_retention_secs() -> u64 {
    3_600
}

const fn default_invoice_expiry_secs() -> u64 {
    HandshakeConfig::DEFAULT_INVOICE_EXPIRY.as_secs()
}

const fn default_step_timeout_secs() -> u64 {
    HandshakeConfig::DEFAULT_STEP_TIMEOUT.as_secs()
}

const fn default_travel_rule() -> bool {
    true
}

const fn default_min_receivable_msats() -> u64 {
    1_000
}

const fn default_max_receivable_msats() -> u64 {
    10_000_000_000
}

impl VaspConfig {
    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config = Self::from_toml(&content, |name| std::env::var(name).ok())?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        Ok(config)
    }

    /// Parses `content` after expanding variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the expanded text is not valid configuration.
    pub fn from_toml(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expanded = expand_vars(content, lookup);
        Ok(toml::from_str(&expanded)?)
    }

    /// Domain counterparties reach this VASP at.
    #[must_use]
    pub fn domain(&self) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.port))
    }

    /// Builds the VASP identity from the configured keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSigningKey`] if the key is empty or an
    /// unexpanded variable, or [`ConfigError::SigningKey`] if it does not decode.
    pub fn identity(&self) -> Result<VaspIdentity, ConfigError> {
        let raw = self.signing_private_key.trim();
        if raw.is_empty() || raw.starts_with('$') {
            return Err(ConfigError::MissingSigningKey);
        }
        let key = VaspSigningKey::from_hex(raw)?;
        let mut identity = VaspIdentity::new(self.domain(), key);
        if let Some(encryption) = &self.encryption_pub_key {
            identity = identity.with_encryption_pub_key(encryption.trim());
        }
        if let Some(valid_for) = self.keys_valid_secs {
            identity =
                identity.with_keys_expire_at(UnixTimestamp::now() + Duration::from_secs(valid_for));
        }
        Ok(identity)
    }

    /// Handshake tunables of the receiver.
    #[must_use]
    pub fn handshake_config(&self) -> HandshakeConfig {
        let config = HandshakeConfig::default()
            .with_step_timeout(Duration::from_secs(self.step_timeout_secs))
            .with_invoice_expiry(Duration::from_secs(self.invoice_expiry_secs))
            .with_exchange_fees_msats(self.receiver_fees_msats)
            .with_travel_rule(self.is_subject_to_travel_rule);
        match &self.node_pub_key {
            Some(key) => config.with_node_pub_key(key.clone()),
            None => config,
        }
    }

    /// Retention of seen nonces.
    #[must_use]
    pub const fn nonce_retention(&self) -> Duration {
        Duration::from_secs(self.nonce_retention_secs)
    }

    /// Step deadline as a [`Duration`].
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Webhook secret, unless unset or an unexpanded variable.
    #[must_use]
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.starts_with('$'))
    }
}

/// Expands `$VAR` and `${VAR}` patterns in `input` through `lookup`.
///
/// Unresolved variables are left as-is.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match lookup(&name).filter(|_| !name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn env(name: &str) -> Option<String> {
        match name {
            "SIGNING_KEY" => Some(KEY.to_owned()),
            "SECRET" => Some("s3cret".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn expands_bare_and_braced_variables() {
        assert_eq!(expand_vars("a=$SECRET;", env), "a=s3cret;");
        assert_eq!(expand_vars("a=${SECRET}x", env), "a=s3cretx");
    }

    #[test]
    fn unresolved_variables_are_kept() {
        assert_eq!(expand_vars("$MISSING and ${MISSING}", env), "$MISSING and ${MISSING}");
        assert_eq!(expand_vars("cost: 5$", env), "cost: 5$");
        assert_eq!(expand_vars("${open", env), "${open");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = VaspConfig::from_toml("", env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.domain(), "localhost:8080");
        assert_eq!(config.nonce_retention(), Duration::from_secs(3_600));
        assert!(config.users.is_empty());
        assert!(config.webhook_secret().is_none());
        assert!(matches!(config.identity(), Err(ConfigError::MissingSigningKey)));
    }

    #[test]
    fn parses_users_currencies_and_keys() {
        let config = VaspConfig::from_toml(
            r#"
            domain = "vasp.example.com"
            signing_private_key = "$SIGNING_KEY"
            webhook_secret = "${SECRET}"
            receiver_fees_msats = 250

            [[currencies]]
            code = "USD"
            name = "US Dollars"
            symbol = "$"
            multiplier = 23000
            minSendable = 1
            maxSendable = 1000000
            decimals = 2

            [[users]]
            id = "1"
            uma_user_name = "bob"
            kyc_status = "VERIFIED"
            name = "Bob"
            currencies = ["USD"]
            max_receivable_msats = 5000000
            "#,
            env,
        )
        .unwrap();

        assert_eq!(config.currencies[0].code(), "USD");
        assert_eq!(config.users[0].user.uma_user_name, "bob");
        assert_eq!(config.users[0].user.name.as_deref(), Some("Bob"));
        assert_eq!(
            config.users[0].receivable(),
            MsatsRange {
                min: 1_000,
                max: 5_000_000
            }
        );
        assert_eq!(config.webhook_secret(), Some("s3cret"));
        assert_eq!(config.handshake_config().exchange_fees_msats, 250);

        let identity = config.identity().unwrap();
        assert_eq!(identity.domain(), "vasp.example.com");
        assert_eq!(identity.pub_key_response().expiration_timestamp, None);
    }

    #[test]
    fn invalid_currencies_are_rejected_at_load() {
        let err = VaspConfig::from_toml(
            r#"
            [[currencies]]
            code = "SAT"
            name = "Satoshis"
            symbol = "SAT"
            multiplier = 0
            minSendable = 1
            maxSendable = 10
            "#,
            env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn garbage_signing_keys_are_reported() {
        let config = VaspConfig::from_toml(r#"signing_private_key = "zz""#, env).unwrap();
        assert!(matches!(config.identity(), Err(ConfigError::SigningKey(_))));
    }
}
