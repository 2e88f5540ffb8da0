//! Expiring cache of counterparty public keys.
//!
//! The cache is a pure memoization layer: it never performs network I/O.
//! A miss, including a hit on an expired bundle, is the signal for the
//! handshake to run key discovery against the counterparty.

use std::fmt::Debug;

use dashmap::DashMap;

use crate::keys::PubKeyResponse;
use crate::timestamp::UnixTimestamp;

/// Shared store of counterparty public key bundles, keyed by VASP domain.
pub trait PublicKeyCache: Send + Sync + Debug {
    /// Returns the bundle for `vasp_domain` if present and not expired.
    fn fetch_public_key_for_vasp(&self, vasp_domain: &str) -> Option<PubKeyResponse>;

    /// Inserts or replaces the bundle for `vasp_domain`. Last write wins.
    fn add_public_key_for_vasp(&self, vasp_domain: &str, bundle: PubKeyResponse);

    /// Drops the bundle for `vasp_domain`, forcing re-discovery.
    fn remove_public_key_for_vasp(&self, vasp_domain: &str);

    /// Drops every bundle.
    fn clear(&self);
}

/// In-memory [`PublicKeyCache`] backed by a sharded concurrent map.
///
/// Lookups of unrelated domains never contend with each other.
#[derive(Debug, Default)]
pub struct InMemoryPublicKeyCache {
    entries: DashMap<String, PubKeyResponse>,
}

impl InMemoryPublicKeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bundles, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no bundles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fetch_at(&self, vasp_domain: &str, now: UnixTimestamp) -> Option<PubKeyResponse> {
        self.entries
            .get(vasp_domain)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.value().clone())
    }
}

impl PublicKeyCache for InMemoryPublicKeyCache {
    fn fetch_public_key_for_vasp(&self, vasp_domain: &str) -> Option<PubKeyResponse> {
        self.fetch_at(vasp_domain, UnixTimestamp::now())
    }

    fn add_public_key_for_vasp(&self, vasp_domain: &str, bundle: PubKeyResponse) {
        self.entries.insert(vasp_domain.to_owned(), bundle);
    }

    fn remove_public_key_for_vasp(&self, vasp_domain: &str) {
        self.entries.remove(vasp_domain);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(key: &str) -> PubKeyResponse {
        PubKeyResponse::new(key, "enc")
    }

    #[test]
    fn miss_on_unknown_domain() {
        let cache = InMemoryPublicKeyCache::new();
        assert!(cache.fetch_public_key_for_vasp("vasp.example").is_none());
    }

    #[test]
    fn expired_bundle_reads_as_absent() {
        let cache = InMemoryPublicKeyCache::new();
        let expired = bundle("old").with_expiration(UnixTimestamp::from_secs(1));
        cache.add_public_key_for_vasp("vasp.example", expired);
        assert_eq!(cache.len(), 1);
        assert!(cache.fetch_public_key_for_vasp("vasp.example").is_none());
    }

    #[test]
    fn bundle_is_served_until_its_expiry() {
        let cache = InMemoryPublicKeyCache::new();
        let b = bundle("k").with_expiration(UnixTimestamp::from_secs(1_000));
        cache.add_public_key_for_vasp("vasp.example", b.clone());
        assert_eq!(
            cache.fetch_at("vasp.example", UnixTimestamp::from_secs(1_000)),
            Some(b)
        );
        assert!(cache.fetch_at("vasp.example", UnixTimestamp::from_secs(1_001)).is_none());
    }

    #[test]
    fn last_write_wins() {
        let cache = InMemoryPublicKeyCache::new();
        cache.add_public_key_for_vasp("vasp.example", bundle("first"));
        cache.add_public_key_for_vasp("vasp.example", bundle("second"));
        let got = cache.fetch_public_key_for_vasp("vasp.example").unwrap();
        assert_eq!(got.signing_pub_key, "second");
    }

    #[test]
    fn remove_and_clear_invalidate() {
        let cache = InMemoryPublicKeyCache::new();
        cache.add_public_key_for_vasp("a.example", bundle("a"));
        cache.add_public_key_for_vasp("b.example", bundle("b"));
        cache.remove_public_key_for_vasp("a.example");
        assert!(cache.fetch_public_key_for_vasp("a.example").is_none());
        assert!(cache.fetch_public_key_for_vasp("b.example").is_some());
        cache.clear();
        assert!(cache.is_empty());
    }
}
