//! KYC status of a VASP user, as exchanged in compliance payloads.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Whether a VASP holds KYC information about one of its users.
///
/// Unknown wire values are preserved in [`KycStatus::Other`] so newer
/// counterparties do not break parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum KycStatus {
    /// No KYC information.
    #[default]
    Unknown,
    /// KYC was attempted and failed or was never started.
    NotVerified,
    /// KYC is in progress.
    Pending,
    /// The user is verified.
    Verified,
    /// A status this crate does not know yet.
    Other(String),
}

impl KycStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::NotVerified => "NOT_VERIFIED",
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for KycStatus {
    fn from(s: &str) -> Self {
        match s {
            "UNKNOWN" => Self::Unknown,
            "NOT_VERIFIED" => Self::NotVerified,
            "PENDING" => Self::Pending,
            "VERIFIED" => Self::Verified,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KycStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KycStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}
