//! Replay protection for signed messages.
//!
//! Every signed UMA message carries a nonce. A nonce is accepted exactly once;
//! any later message reusing it is a replay, whatever its timestamp says.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::timestamp::UnixTimestamp;

/// Shared store of seen nonces.
#[async_trait::async_trait]
pub trait NonceValidator: Send + Sync + Debug {
    /// Records `nonce` and returns `true` the first time it is seen.
    ///
    /// Returns `false` for any repeat. Two concurrent calls with the same
    /// nonce never both succeed.
    async fn check_and_save_nonce(&self, nonce: &str, timestamp: UnixTimestamp) -> bool;
}

/// In-memory [`NonceValidator`].
///
/// Records older than a retention window can be dropped with
/// [`Self::purge_nonces_older_than`]. Purging raises a floor below which
/// message timestamps are refused, so a purged nonce cannot be replayed with
/// its original signed timestamp.
#[derive(Debug)]
pub struct InMemoryNonceValidator {
    seen: DashMap<String, UnixTimestamp>,
    floor: AtomicU64,
}

impl InMemoryNonceValidator {
    /// Creates a validator that accepts any timestamp at or after `oldest_valid`.
    #[must_use]
    pub fn new(oldest_valid: UnixTimestamp) -> Self {
        Self {
            seen: DashMap::new(),
            floor: AtomicU64::new(oldest_valid.as_secs()),
        }
    }

    /// Drops every record older than `cutoff` and refuses older timestamps from now on.
    pub fn purge_nonces_older_than(&self, cutoff: UnixTimestamp) {
        self.floor.fetch_max(cutoff.as_secs(), Ordering::SeqCst);
        self.seen.retain(|_, ts| *ts >= cutoff);
    }

    /// Oldest message timestamp still accepted.
    #[must_use]
    pub fn oldest_valid(&self) -> UnixTimestamp {
        UnixTimestamp::from_secs(self.floor.load(Ordering::SeqCst))
    }

    /// Number of remembered nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no nonce is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for InMemoryNonceValidator {
    fn default() -> Self {
        Self::new(UnixTimestamp::from_secs(0))
    }
}

#[async_trait::async_trait]
impl NonceValidator for InMemoryNonceValidator {
    async fn check_and_save_nonce(&self, nonce: &str, timestamp: UnixTimestamp) -> bool {
        if timestamp < self.oldest_valid() {
            return false;
        }
        match self.seen.entry(nonce.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(timestamp);
                true
            }
        }
    }
}
