//! Background upkeep of the server's in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uma::nonce::InMemoryNonceValidator;
use uma::timestamp::UnixTimestamp;

/// Drops nonces older than `retention`, once per `retention`, until `shutdown`.
///
/// Purged nonces stay unusable: the validator refuses any message stamped
/// before the last cutoff.
pub async fn purge_nonces(
    nonces: Arc<InMemoryNonceValidator>,
    retention: Duration,
    shutdown: CancellationToken,
) {
    let period = retention.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let cutoff = UnixTimestamp::now() - retention;
                nonces.purge_nonces_older_than(cutoff);
                tracing::debug!(%cutoff, remaining = nonces.len(), "purged nonces");
            }
        }
    }
    tracing::debug!("nonce purge stopped");
}

#[cfg(test)]
mod tests {
    use uma::nonce::NonceValidator;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn purges_every_period_until_shutdown() {
        let retention = Duration::from_secs(3_600);
        let nonces = Arc::new(InMemoryNonceValidator::new(UnixTimestamp::from_secs(0)));
        let stale = UnixTimestamp::now() - retention * 2;
        assert!(nonces.check_and_save_nonce("old", stale).await);
        assert!(nonces.check_and_save_nonce("new", UnixTimestamp::now()).await);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(purge_nonces(Arc::clone(&nonces), retention, shutdown.clone()));

        tokio::time::sleep(retention + Duration::from_secs(1)).await;
        assert_eq!(nonces.len(), 1);
        assert!(!nonces.check_and_save_nonce("old", stale).await);

        shutdown.cancel();
        task.await.unwrap();
    }
}
