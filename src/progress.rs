//! Scan-progress cursor.
//!
//! The authoritative copy of `(last_scanned_height, last_scanned_hash)`
//! lives in the destination ledger's own store; a local JSON mirror is
//! written for diagnostics and migration only. Advancement re-derives
//! the hash at the target height from the ledger's header view; a
//! mismatch is the daemon's sole reorg-detection mechanism and refuses
//! the write, leaving the cursor where it was.

use crate::destination::DestinationLedger;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The persisted scan cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub height: u64,
    pub hash: String,
}

/// Local mirror record; the ledger copy is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressMirror {
    pub height: u64,
    pub hash: String,
    pub updated_at: String,
}

pub struct ProgressStore {
    ledger: Arc<dyn DestinationLedger>,
    checkpoint_height: u64,
    mirror_path: Option<PathBuf>,
}

impl ProgressStore {
    pub fn new(
        ledger: Arc<dyn DestinationLedger>,
        checkpoint_height: u64,
        mirror_path: Option<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            checkpoint_height,
            mirror_path,
        }
    }

    /// Current cursor. Before the first advancement the cursor is seeded
    /// at the checkpoint, whose hash comes from the ledger's header view.
    pub async fn get(&self) -> Result<ScanProgress, BridgeError> {
        if let Some(progress) = self.ledger.scan_progress().await? {
            return Ok(progress);
        }
        let hash = self
            .ledger
            .header_hash_at(self.checkpoint_height)
            .await?
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "ledger has no header at checkpoint height {}",
                    self.checkpoint_height
                ))
            })?;
        Ok(ScanProgress {
            height: self.checkpoint_height,
            hash,
        })
    }

    /// Try to advance the cursor to `(height, hash)` as observed during
    /// scanning. Returns false without writing when the cursor would move
    /// backward, the height is not in the ledger's header view yet, or
    /// the ledger's hash at that height disagrees (reorg). A refusal is
    /// not an error: the next pass re-derives a consistent range.
    pub async fn advance(&self, height: u64, hash: &str) -> Result<bool, BridgeError> {
        let current = self.get().await?;
        if height < current.height {
            warn!(
                "Refusing cursor regression: {} < {}",
                height, current.height
            );
            return Ok(false);
        }
        if height == current.height && hash == current.hash {
            return Ok(true);
        }

        let ledger_hash = match self.ledger.header_hash_at(height).await? {
            Some(h) => h,
            None => {
                warn!(
                    "Cannot advance to {}: height not in ledger header view",
                    height
                );
                return Ok(false);
            }
        };
        if ledger_hash != hash {
            let reorg = BridgeError::ReorgDetected {
                height,
                ledger_hash,
                scanned_hash: hash.to_string(),
            };
            warn!("{}; cursor stays at {}", reorg, current.height);
            return Ok(false);
        }

        let progress = ScanProgress {
            height,
            hash: hash.to_string(),
        };
        if !self.ledger.set_scan_progress(&progress).await? {
            warn!("Ledger refused scan-progress write at height {}", height);
            return Ok(false);
        }

        self.write_mirror(&progress);
        info!("Scan progress advanced to {} ({})", height, hash);
        Ok(true)
    }

    /// Best-effort mirror write; a mirror failure never blocks the
    /// authoritative advancement.
    fn write_mirror(&self, progress: &ScanProgress) {
        let Some(ref path) = self.mirror_path else {
            return;
        };
        let record = ProgressMirror {
            height: progress.height,
            hash: progress.hash.clone(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("Failed to write progress mirror {}: {}", path.display(), e);
                } else {
                    debug!("Mirrored progress to {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize progress mirror: {}", e),
        }
    }
}

/// Read the local mirror, for `status` when the ledger is unreachable.
pub fn read_mirror(path: &Path) -> Option<ProgressMirror> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MockLedger;
    use crate::source::{mock_block_hash, mock_raw_header};

    async fn store_with_headers(upto: u64) -> (Arc<MockLedger>, ProgressStore) {
        let ledger = Arc::new(MockLedger::new(286_000, &mock_block_hash(286_000, 0)));
        let headers: Vec<String> = (286_001..=upto)
            .map(|h| mock_raw_header(h, &mock_block_hash(h, 0)))
            .collect();
        ledger.submit_headers(&headers).await.unwrap();
        let store = ProgressStore::new(ledger.clone(), 286_000, None);
        (ledger, store)
    }

    #[tokio::test]
    async fn test_seeded_at_checkpoint() {
        let (_ledger, store) = store_with_headers(286_004).await;
        let progress = store.get().await.unwrap();
        assert_eq!(progress.height, 286_000);
        assert_eq!(progress.hash, mock_block_hash(286_000, 0));
    }

    #[tokio::test]
    async fn test_monotonic_advancement() {
        let (_ledger, store) = store_with_headers(286_004).await;

        assert!(store.advance(286_002, &mock_block_hash(286_002, 0)).await.unwrap());
        assert!(store.advance(286_004, &mock_block_hash(286_004, 0)).await.unwrap());
        // Regression refused
        assert!(!store.advance(286_001, &mock_block_hash(286_001, 0)).await.unwrap());
        assert_eq!(store.get().await.unwrap().height, 286_004);
        // Same-height same-hash is an accepted no-op
        assert!(store.advance(286_004, &mock_block_hash(286_004, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reorg_hash_mismatch_refused() {
        let (_ledger, store) = store_with_headers(286_004).await;
        assert!(store.advance(286_002, &mock_block_hash(286_002, 0)).await.unwrap());

        // Scanner observed a fork hash at 286003 that the ledger's header
        // view does not carry: the cursor must stay at 286002.
        let forked = mock_block_hash(286_003, 1);
        assert!(!store.advance(286_003, &forked).await.unwrap());
        assert_eq!(store.get().await.unwrap().height, 286_002);
    }

    #[tokio::test]
    async fn test_unrelayed_height_refused() {
        let (_ledger, store) = store_with_headers(286_004).await;
        assert!(!store.advance(286_010, &mock_block_hash(286_010, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_mirror_written_on_accept() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("progress.json");
        let ledger = Arc::new(MockLedger::new(286_000, &mock_block_hash(286_000, 0)));
        ledger
            .submit_headers(&[mock_raw_header(286_001, &mock_block_hash(286_001, 0))])
            .await
            .unwrap();
        let store = ProgressStore::new(ledger, 286_000, Some(mirror.clone()));

        assert!(store.advance(286_001, &mock_block_hash(286_001, 0)).await.unwrap());

        let record = read_mirror(&mirror).unwrap();
        assert_eq!(record.height, 286_001);
        assert_eq!(record.hash, mock_block_hash(286_001, 0));

        // Refused advancement must not touch the mirror
        assert!(!store.advance(286_003, &mock_block_hash(286_003, 0)).await.unwrap());
        assert_eq!(read_mirror(&mirror).unwrap().height, 286_001);
    }
}
