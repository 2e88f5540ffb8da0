//! UMA protocol version and negotiation.
//!
//! Versions are `major.minor`. Two VASPs interoperate when they share a major
//! version; within it they settle on the lower of their minor versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Major version this crate implements.
pub const MAJOR_VERSION: u16 = 0;
/// Minor version this crate implements.
pub const MINOR_VERSION: u16 = 1;

/// A `major.minor` protocol version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UmaVersion {
    major: u16,
    minor: u16,
}

/// The version string did not have the form `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid uma version: {0}")]
pub struct InvalidVersion(String);

impl UmaVersion {
    /// The version this crate speaks by default.
    pub const CURRENT: Self = Self::new(MAJOR_VERSION, MINOR_VERSION);

    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Major component.
    #[must_use]
    pub const fn major(&self) -> u16 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(&self) -> u16 {
        self.minor
    }

    /// Whether this crate can speak `self`'s major version.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        supported_major_versions().contains(&self.major)
    }

    /// Picks the version to answer a counterparty that asked for `self`.
    ///
    /// Returns the lower of `self` and our highest version for the same major,
    /// or `None` when the major is unsupported.
    #[must_use]
    pub fn negotiate(self) -> Option<Self> {
        highest_supported_for_major(self.major).map(|ours| select_lower_version(self, ours))
    }
}

impl Default for UmaVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for UmaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for UmaVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(s.to_owned());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for UmaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UmaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Major versions this crate can speak.
#[must_use]
pub const fn supported_major_versions() -> &'static [u16] {
    &[MAJOR_VERSION]
}

/// Highest version we support within `major`.
#[must_use]
pub const fn highest_supported_for_major(major: u16) -> Option<UmaVersion> {
    if major == MAJOR_VERSION {
        Some(UmaVersion::CURRENT)
    } else {
        None
    }
}

/// Returns the lower of two versions.
#[must_use]
pub fn select_lower_version(a: UmaVersion, b: UmaVersion) -> UmaVersion {
    a.min(b)
}

/// Picks the highest version both sides support, given the counterparty's majors.
#[must_use]
pub fn select_highest_supported_version(other_majors: &[u16]) -> Option<UmaVersion> {
    other_majors
        .iter()
        .filter_map(|major| highest_supported_for_major(*major))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let v: UmaVersion = "0.1".parse().unwrap();
        assert_eq!(v, UmaVersion::CURRENT);
        assert_eq!(v.to_string(), "0.1");
        assert!("1".parse::<UmaVersion>().is_err());
        assert!("a.b".parse::<UmaVersion>().is_err());
        assert!("1.2.3".parse::<UmaVersion>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&UmaVersion::new(0, 3)).unwrap();
        assert_eq!(json, "\"0.3\"");
        let back: UmaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UmaVersion::new(0, 3));
    }

    #[test]
    fn negotiation_picks_the_lower_minor() {
        assert_eq!(UmaVersion::new(0, 9).negotiate(), Some(UmaVersion::CURRENT));
        assert_eq!(UmaVersion::new(0, 0).negotiate(), Some(UmaVersion::new(0, 0)));
        assert_eq!(UmaVersion::new(7, 0).negotiate(), None);
    }

    #[test]
    fn highest_common_version() {
        assert_eq!(
            select_highest_supported_version(&[0, 5]),
            Some(UmaVersion::CURRENT)
        );
        assert_eq!(select_highest_supported_version(&[3]), None);
        assert!(UmaVersion::CURRENT.is_supported());
        assert!(!UmaVersion::new(2, 0).is_supported());
    }
}
