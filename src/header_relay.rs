//! Header relay.
//!
//! Keeps the destination ledger's copy of source-chain headers current
//! up to the safe height, in batches. A failed batch is retried with the
//! same range; persistent failure aborts the cycle (fatal to the pass,
//! prior state intact). Only the ledger's header tip moves here, never
//! the scan cursor.

use crate::destination::DestinationLedger;
use crate::error::BridgeError;
use crate::source::SourceChainReader;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct HeaderRelay {
    source: Arc<dyn SourceChainReader>,
    ledger: Arc<dyn DestinationLedger>,
    batch: u64,
    max_retries: u32,
}

impl HeaderRelay {
    pub fn new(
        source: Arc<dyn SourceChainReader>,
        ledger: Arc<dyn DestinationLedger>,
        batch: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            source,
            ledger,
            batch,
            max_retries,
        }
    }

    /// Relay headers until the ledger's header tip reaches `target`.
    /// Returns the resulting tip (which may already be past `target`
    /// when no work is needed).
    pub async fn relay_to(&self, target: u64) -> Result<u64, BridgeError> {
        let mut tip = self.ledger.header_tip().await?;
        if tip >= target {
            debug!("Header relay current at {} (target {})", tip, target);
            return Ok(tip);
        }
        info!("Relaying headers {} -> {}", tip, target);

        while tip < target {
            let from = tip + 1;
            let count = (target - tip).min(self.batch);
            self.submit_batch(from, count).await?;

            let new_tip = self.ledger.header_tip().await?;
            if new_tip <= tip {
                // Accepted without error but no progress: refuse to spin
                return Err(BridgeError::HeaderRelayFailed {
                    from,
                    attempts: self.max_retries,
                });
            }
            tip = new_tip;
        }

        info!("Header relay reached {}", tip);
        Ok(tip)
    }

    /// Submit one batch, retrying the same range on failure.
    async fn submit_batch(&self, from: u64, count: u64) -> Result<(), BridgeError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = async {
                let headers = self.source.raw_headers(from, count).await?;
                self.ledger.submit_headers(&headers).await
            }
            .await;

            match result {
                Ok(()) => {
                    debug!("Submitted header batch [{}, {})", from, from + count);
                    return Ok(());
                }
                Err(e) if attempts < self.max_retries => {
                    warn!(
                        "Header batch at {} failed (attempt {}/{}): {}",
                        from, attempts, self.max_retries, e
                    );
                }
                Err(e) => {
                    warn!("Header batch at {} failed permanently: {}", from, e);
                    return Err(BridgeError::HeaderRelayFailed { from, attempts });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockLedger;
    use crate::source::{MockSourceChain, mock_block_hash};

    fn chain_to(upto: u64) -> Arc<MockSourceChain> {
        let chain = Arc::new(MockSourceChain::new());
        for h in 286_000..=upto {
            chain.add_block(h, vec![]);
        }
        chain
    }

    fn ledger() -> Arc<MockLedger> {
        Arc::new(MockLedger::new(286_000, &mock_block_hash(286_000, 0)))
    }

    #[tokio::test]
    async fn test_catches_up_in_batches() {
        let chain = chain_to(286_010);
        let ledger = ledger();
        let relay = HeaderRelay::new(chain, ledger.clone(), 3, 3);

        let tip = relay.relay_to(286_008).await.unwrap();
        assert_eq!(tip, 286_008);
        assert_eq!(
            ledger.header_hash_at(286_008).await.unwrap().unwrap(),
            mock_block_hash(286_008, 0)
        );
        // Nothing past the target
        assert!(ledger.header_hash_at(286_009).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_work_when_current() {
        let chain = chain_to(286_010);
        let ledger = ledger();
        let relay = HeaderRelay::new(chain, ledger.clone(), 500, 3);

        relay.relay_to(286_004).await.unwrap();
        // Target below tip: returns the existing tip untouched
        let tip = relay.relay_to(286_002).await.unwrap();
        assert_eq!(tip, 286_004);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let chain = chain_to(286_005);
        let ledger = ledger();
        ledger.fail_next_header_batches(1);
        let relay = HeaderRelay::new(chain, ledger.clone(), 500, 3);

        let tip = relay.relay_to(286_005).await.unwrap();
        assert_eq!(tip, 286_005);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_fatal() {
        let chain = chain_to(286_005);
        let ledger = ledger();
        ledger.fail_next_header_batches(10);
        let relay = HeaderRelay::new(chain, ledger.clone(), 500, 3);

        let err = relay.relay_to(286_005).await.unwrap_err();
        assert!(matches!(err, BridgeError::HeaderRelayFailed { .. }));
        // Prior state intact
        assert_eq!(ledger.header_tip().await.unwrap(), 286_000);
    }
}
