//! UMA addresses: `$user@vasp.domain`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static USER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // constant pattern
    Regex::new(r"(?i)^[a-z0-9\-_.+]+$").unwrap()
});

const MAX_USER_NAME_LEN: usize = 64;

/// The string is not a valid UMA address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid uma address: {0}")]
pub struct InvalidAddress(String);

/// A validated UMA address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UmaAddress {
    raw: String,
    at: usize,
}

impl UmaAddress {
    /// Parses and validates an address.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAddress`] unless the address has a leading `$`,
    /// exactly one `@`, a non-empty domain and a user name of at most 64
    /// characters drawn from `[a-z0-9-_.+]` (case-insensitive).
    pub fn parse(s: &str) -> Result<Self, InvalidAddress> {
        let invalid = || InvalidAddress(s.to_owned());
        let rest = s.strip_prefix('$').ok_or_else(invalid)?;
        let (user, domain) = rest.split_once('@').ok_or_else(invalid)?;
        if domain.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        if user.len() > MAX_USER_NAME_LEN || !USER_NAME.is_match(user) {
            return Err(invalid());
        }
        Ok(Self {
            raw: s.to_owned(),
            at: user.len() + 1,
        })
    }

    /// User name without the leading `$`.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.raw[1..self.at]
    }

    /// Domain of the VASP hosting this address.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.raw[self.at + 1..]
    }

    /// The full address as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Whether `s` is a valid UMA address.
#[must_use]
pub fn is_valid_uma_address(s: &str) -> bool {
    UmaAddress::parse(s).is_ok()
}

impl fmt::Display for UmaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for UmaAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UmaAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for UmaAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_addresses() {
        let addr = UmaAddress::parse("$Bob.Smith+tip@receive.example.com").unwrap();
        assert_eq!(addr.user(), "Bob.Smith+tip");
        assert_eq!(addr.domain(), "receive.example.com");
        assert!(is_valid_uma_address("$alice@localhost:8080"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "bob@receive.example.com",
            "$bob",
            "$bob@a@b",
            "$@receive.example.com",
            "$bo b@receive.example.com",
            "$bob@",
            "$bøb@receive.example.com",
        ] {
            assert!(!is_valid_uma_address(bad), "{bad}");
        }
    }

    #[test]
    fn user_name_is_capped_at_64_chars() {
        let ok = format!("${}@x.com", "a".repeat(64));
        let too_long = format!("${}@x.com", "a".repeat(65));
        assert!(is_valid_uma_address(&ok));
        assert!(!is_valid_uma_address(&too_long));
    }
}
