//! Burn scanner.
//!
//! Walks source-chain blocks over a height range and extracts candidate
//! burn transactions: any transaction with a data-carrier output whose
//! payload starts with the burn tag. A pure function of chain state at a
//! given height; candidate order is block order, then tx order within a
//! block.

use crate::error::BridgeError;
use crate::script;
use crate::source::SourceChainReader;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A burn found during scanning. Transient; lives for one pass plus the
/// advisory cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnCandidate {
    pub txid: String,
    pub height: u64,
}

/// Advisory cache of burns found over a contiguous scanned range, so a
/// daemon restart does not re-derive them. Never consulted for claim
/// status; candidates are always re-validated against the ledger before
/// submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScanCache {
    covered_from: u64,
    covered_to: u64,
    found: Vec<BurnCandidate>,
}

impl ScanCache {
    fn covers(&self, from: u64, to: u64) -> bool {
        self.covered_to > 0 && self.covered_from <= from && to <= self.covered_to
    }
}

pub struct BurnScanner {
    source: Arc<dyn SourceChainReader>,
    cache: Option<Mutex<ScanCache>>,
    cache_path: Option<PathBuf>,
}

impl BurnScanner {
    pub fn new(source: Arc<dyn SourceChainReader>) -> Self {
        Self {
            source,
            cache: None,
            cache_path: None,
        }
    }

    /// Enable the advisory cache, optionally persisted to `path`.
    pub fn with_cache(source: Arc<dyn SourceChainReader>, path: Option<PathBuf>) -> Self {
        let cache = path
            .as_deref()
            .and_then(|p| std::fs::read(p).ok())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self {
            source,
            cache: Some(Mutex::new(cache)),
            cache_path: path,
        }
    }

    /// Scan `[from, to]` inclusive and return burn candidates in chain
    /// order. The same txid is never reported twice for one range.
    pub async fn scan_range(&self, from: u64, to: u64) -> Result<Vec<BurnCandidate>, BridgeError> {
        if from > to {
            return Ok(Vec::new());
        }

        if let Some(ref cache) = self.cache {
            let cached = cache.lock().unwrap();
            if cached.covers(from, to) {
                let hits: Vec<BurnCandidate> = cached
                    .found
                    .iter()
                    .filter(|c| c.height >= from && c.height <= to)
                    .cloned()
                    .collect();
                debug!(
                    "Scan cache hit for [{}, {}]: {} candidates",
                    from,
                    to,
                    hits.len()
                );
                return Ok(hits);
            }
        }

        let mut candidates = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for height in from..=to {
            let block = self.source.block(height).await?;
            let mut in_block = 0usize;
            for tx in &block.txs {
                let is_burn = tx.output_scripts.iter().any(|s| script::is_burn_output(s));
                if is_burn && seen.insert(tx.txid.clone()) {
                    candidates.push(BurnCandidate {
                        txid: tx.txid.clone(),
                        height,
                    });
                    in_block += 1;
                }
            }
            if in_block > 0 {
                info!("Found {} burn(s) in source block {}", in_block, height);
            }
        }

        self.update_cache(from, to, &candidates);
        Ok(candidates)
    }

    fn update_cache(&self, from: u64, to: u64, candidates: &[BurnCandidate]) {
        let Some(ref cache) = self.cache else {
            return;
        };
        let mut cached = cache.lock().unwrap();

        if cached.covered_to > 0 && from <= cached.covered_to + 1 && from >= cached.covered_from {
            // Contiguous extension of the covered range
            cached.found.retain(|c| c.height < from);
            cached.found.extend_from_slice(candidates);
            cached.covered_to = cached.covered_to.max(to);
        } else {
            // Disjoint range: restart coverage
            *cached = ScanCache {
                covered_from: from,
                covered_to: to,
                found: candidates.to_vec(),
            };
        }

        if let Some(ref path) = self.cache_path {
            match serde_json::to_vec(&*cached) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(path, bytes) {
                        warn!("Failed to persist scan cache {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to serialize scan cache: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{BURN_TAG, OP_RETURN};
    use crate::source::{MockSourceChain, SourceTx};

    fn burn_script(recipient: &[u8]) -> Vec<u8> {
        let mut payload = BURN_TAG.to_vec();
        payload.extend_from_slice(recipient);
        let mut script = vec![OP_RETURN, payload.len() as u8];
        script.extend_from_slice(&payload);
        script
    }

    fn plain_tx(seed: u8) -> SourceTx {
        SourceTx {
            txid: hex::encode([seed; 32]),
            // P2PKH-shaped, no data carrier
            output_scripts: vec![vec![0x76, 0xa9, 0x14, seed, 0x88, 0xac]],
        }
    }

    fn burn_tx(seed: u8, recipient: &[u8]) -> SourceTx {
        SourceTx {
            txid: hex::encode([seed; 32]),
            output_scripts: vec![
                vec![0x76, 0xa9, 0x14, seed, 0x88, 0xac],
                burn_script(recipient),
            ],
        }
    }

    fn chain_with_burns() -> Arc<MockSourceChain> {
        let chain = Arc::new(MockSourceChain::new());
        chain.add_block(286_000, vec![plain_tx(1)]);
        chain.add_block(286_001, vec![plain_tx(2)]);
        chain.add_block(
            286_002,
            vec![plain_tx(3), burn_tx(4, b"destX"), burn_tx(5, b"destY")],
        );
        chain.add_block(286_003, vec![plain_tx(6)]);
        chain.add_block(286_004, vec![burn_tx(7, b"destZ")]);
        chain
    }

    #[tokio::test]
    async fn test_finds_burns_in_chain_order() {
        let scanner = BurnScanner::new(chain_with_burns());
        let found = scanner.scan_range(286_001, 286_004).await.unwrap();

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].txid, hex::encode([4u8; 32]));
        assert_eq!(found[0].height, 286_002);
        assert_eq!(found[1].txid, hex::encode([5u8; 32]));
        assert_eq!(found[2].height, 286_004);
    }

    #[tokio::test]
    async fn test_deterministic_over_immutable_range() {
        let scanner = BurnScanner::new(chain_with_burns());
        let first = scanner.scan_range(286_001, 286_004).await.unwrap();
        let second = scanner.scan_range(286_001, 286_004).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_data_carrier_without_tag_ignored() {
        let chain = Arc::new(MockSourceChain::new());
        let mut script = vec![OP_RETURN, 8];
        script.extend_from_slice(b"ordinals");
        chain.add_block(
            100,
            vec![SourceTx {
                txid: hex::encode([9u8; 32]),
                output_scripts: vec![script],
            }],
        );

        let scanner = BurnScanner::new(chain);
        assert!(scanner.scan_range(100, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_range_and_empty_blocks() {
        let scanner = BurnScanner::new(chain_with_burns());
        assert!(scanner.scan_range(286_003, 286_003).await.unwrap().is_empty());
        assert!(scanner.scan_range(286_004, 286_001).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_covered_range() {
        let chain = chain_with_burns();
        let scanner = BurnScanner::with_cache(chain.clone(), None);

        let first = scanner.scan_range(286_001, 286_004).await.unwrap();
        // A sub-range served from cache matches a fresh scan
        let cached = scanner.scan_range(286_002, 286_003).await.unwrap();
        assert_eq!(cached.len(), 2);
        assert!(first.iter().any(|c| c == &cached[0]));
    }

    #[tokio::test]
    async fn test_cache_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burn_cache.json");
        let chain = chain_with_burns();

        let scanner = BurnScanner::with_cache(chain.clone(), Some(path.clone()));
        let first = scanner.scan_range(286_001, 286_004).await.unwrap();
        drop(scanner);

        // New scanner loads the cache file and serves the same range
        let restarted = BurnScanner::with_cache(chain, Some(path));
        let again = restarted.scan_range(286_001, 286_004).await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_disjoint_range_resets_cache() {
        let chain = chain_with_burns();
        let scanner = BurnScanner::with_cache(chain, None);

        scanner.scan_range(286_000, 286_001).await.unwrap();
        // Far-away range: coverage restarts there, results still correct
        let found = scanner.scan_range(286_004, 286_004).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].height, 286_004);
    }
}
