//! Finality orchestrator.
//!
//! One pass runs HeaderSync -> Scanning -> Submitting -> Advancing, then
//! the outer loop sleeps the poll interval and repeats. Bootstrap mode is
//! the same pass on a tight cadence with a bounded iteration count, until
//! the cursor is within a margin of the source tip. There is no rollback
//! state: rollback is implicit in the progress store's refusal to
//! advance.
//!
//! Scanning is inherently sequential (the safe height depends on the
//! previous cursor), so one logical thread of control drives everything.
//! Cancellation is checked between passes and between scan chunks, both
//! boundaries where progress was just durably advanced.

use crate::claims::{ClaimSubmitter, SubmitResult};
use crate::config::Config;
use crate::destination::DestinationLedger;
use crate::error::BridgeError;
use crate::header_relay::HeaderRelay;
use crate::progress::ProgressStore;
use crate::scanner::BurnScanner;
use crate::source::SourceChainReader;
use crate::state::StateDir;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

/// Cooperative shutdown flag shared with the control surface.
pub struct ShutdownSignal {
    shutdown: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The scanner never scans, and the relay never claims coverage, past
/// what is locally verifiable: source tip minus confirmation depth,
/// further bounded by the ledger's relayed header tip.
pub fn safe_height(source_tip: u64, confirmations: u64, header_tip: u64) -> u64 {
    source_tip.saturating_sub(confirmations).min(header_tip)
}

/// What one pass did; `status` and the logs surface this.
#[derive(Debug, Default, Clone)]
pub struct PassReport {
    pub source_tip: u64,
    pub header_tip: u64,
    pub scanned_to: Option<u64>,
    pub burns_found: usize,
    pub claims_submitted: usize,
    pub claims_duplicate: usize,
    pub claims_terminal: usize,
    pub claims_skipped: usize,
}

pub struct BridgeDaemon {
    source: Arc<dyn SourceChainReader>,
    relay: HeaderRelay,
    scanner: BurnScanner,
    submitter: ClaimSubmitter,
    progress: ProgressStore,
    shutdown: Arc<ShutdownSignal>,
    state: Option<Arc<StateDir>>,

    checkpoint_height: u64,
    confirmations: u64,
    chunk_size: u64,
    max_claims_per_block: usize,
    poll_interval: Duration,
    max_block_lag_seconds: i64,
    bootstrap_interval: Duration,
    bootstrap_margin: u64,
    bootstrap_max_iterations: u32,
}

impl BridgeDaemon {
    pub fn new(
        source: Arc<dyn SourceChainReader>,
        ledger: Arc<dyn DestinationLedger>,
        config: &Config,
        state: Option<Arc<StateDir>>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        let relay = HeaderRelay::new(
            source.clone(),
            ledger.clone(),
            config.relay.header_batch,
            config.relay.max_batch_retries,
        );
        let scanner = if config.scan.cache_enabled {
            BurnScanner::with_cache(source.clone(), state.as_ref().map(|s| s.cache_path()))
        } else {
            BurnScanner::new(source.clone())
        };
        let submitter = ClaimSubmitter::new(source.clone(), ledger.clone());
        let progress = ProgressStore::new(
            ledger,
            config.relay.checkpoint_height,
            state.as_ref().map(|s| s.mirror_path()),
        );

        Self {
            source,
            relay,
            scanner,
            submitter,
            progress,
            shutdown,
            state,
            checkpoint_height: config.relay.checkpoint_height,
            confirmations: config.relay.confirmations,
            chunk_size: config.scan.chunk_size,
            max_claims_per_block: config.scan.max_claims_per_block,
            poll_interval: Duration::from_secs(config.scan.poll_interval_secs),
            max_block_lag_seconds: config.source.max_block_lag_seconds,
            bootstrap_interval: Duration::from_secs(config.bootstrap.interval_secs),
            bootstrap_margin: config.bootstrap.catchup_margin,
            bootstrap_max_iterations: config.bootstrap.max_iterations,
        }
    }

    fn cancelled(&self) -> bool {
        self.shutdown.is_shutdown_requested()
            || self.state.as_ref().is_some_and(|s| s.stop_requested())
    }

    /// One full pass. A header-sync fatal failure surfaces as an error
    /// and aborts the pass with prior state intact; everything per-item
    /// is contained and reported.
    pub async fn run_pass(&self) -> Result<PassReport, BridgeError> {
        let mut report = PassReport::default();

        let source_tip = self.source.tip_height().await?;
        report.source_tip = source_tip;
        self.warn_if_stale().await;

        // HeaderSync: bring the ledger's header view up to the safe target
        let relay_target = source_tip
            .saturating_sub(self.confirmations)
            .max(self.checkpoint_height);
        let header_tip = self.relay.relay_to(relay_target).await?;
        report.header_tip = header_tip;

        let safe = safe_height(source_tip, self.confirmations, header_tip);
        let progress = self.progress.get().await?;
        if safe <= progress.height {
            debug!(
                "Nothing to scan: cursor {} already at safe height {}",
                progress.height, safe
            );
            return Ok(report);
        }

        // Scanning + Submitting + Advancing, chunked so bootstrap
        // catch-up can be cancelled at durable boundaries
        let mut from = progress.height + 1;
        while from <= safe {
            let chunk_to = (from + self.chunk_size - 1).min(safe);
            let keep_going = self.run_chunk(from, chunk_to, &mut report).await?;
            if !keep_going {
                break;
            }
            from = chunk_to + 1;
            if self.cancelled() {
                info!("Stop requested, ending pass after chunk");
                break;
            }
        }

        Ok(report)
    }

    /// Scan one chunk, submit its claims in height order, and try to
    /// advance the cursor. Returns whether the pass should continue with
    /// the next chunk.
    async fn run_chunk(
        &self,
        from: u64,
        to: u64,
        report: &mut PassReport,
    ) -> Result<bool, BridgeError> {
        let candidates = self.scanner.scan_range(from, to).await?;
        report.burns_found += candidates.len();

        let mut advance_to = to;
        let mut truncated = false;
        let mut current_height = 0u64;
        let mut new_in_block = 0usize;

        for candidate in &candidates {
            if candidate.height != current_height {
                current_height = candidate.height;
                new_in_block = 0;
            }
            if new_in_block >= self.max_claims_per_block {
                // Cap on newly submitted claims reached: do not advance
                // past this block, the remainder lands next pass
                info!(
                    "Per-block claim cap reached at height {}, deferring remainder",
                    current_height
                );
                advance_to = current_height - 1;
                truncated = true;
                break;
            }
            match self.submitter.submit(candidate).await? {
                SubmitResult::Accepted => {
                    new_in_block += 1;
                    report.claims_submitted += 1;
                }
                SubmitResult::AlreadyClaimed => report.claims_duplicate += 1,
                SubmitResult::Terminal(reason) => {
                    // Permanent in this chain state; the cursor moves on
                    warn!("Terminal rejection for {}: {}", candidate.txid, reason);
                    report.claims_terminal += 1;
                }
                SubmitResult::Skipped(reason) => {
                    // Retryable: hold the cursor below this burn so a
                    // later pass sees it again
                    warn!(
                        "Skipping {} this pass ({}), will retry",
                        candidate.txid, reason
                    );
                    report.claims_skipped += 1;
                    advance_to = candidate.height - 1;
                    truncated = true;
                    break;
                }
            }
        }

        if advance_to < from {
            // Nothing durable to record for this chunk
            return Ok(false);
        }

        let scanned_hash = self.source.block_hash(advance_to).await?;
        let advanced = self.progress.advance(advance_to, &scanned_hash).await?;
        if !advanced {
            // Reorg or not-yet-relayed height: stop advancing this cycle,
            // the next pass re-derives a consistent range
            return Ok(false);
        }
        report.scanned_to = Some(advance_to);
        Ok(!truncated)
    }

    async fn warn_if_stale(&self) {
        if let Ok(tip_time) = self.source.tip_time().await {
            let lag = chrono::Utc::now().timestamp() - tip_time;
            if lag > self.max_block_lag_seconds {
                warn!("Source node looks stale: tip block is {}s old", lag);
            }
        }
    }

    /// Daemon loop: pass, sleep, repeat until stopped.
    pub async fn run(&self) -> Result<(), BridgeError> {
        info!(
            "Bridge daemon starting: checkpoint {}, confirmations {}, poll {:?}",
            self.checkpoint_height, self.confirmations, self.poll_interval
        );

        while !self.cancelled() {
            match self.run_pass().await {
                Ok(report) => {
                    info!(
                        "Pass complete: tip {}, headers {}, scanned_to {:?}, burns {}, submitted {}, dup {}, terminal {}, skipped {}",
                        report.source_tip,
                        report.header_tip,
                        report.scanned_to,
                        report.burns_found,
                        report.claims_submitted,
                        report.claims_duplicate,
                        report.claims_terminal,
                        report.claims_skipped
                    );
                }
                Err(e) => error!("Pass failed: {}", e),
            }
            self.sleep_cancellable(self.poll_interval).await;
        }

        if let Some(ref state) = self.state {
            state.clear_stop();
        }
        info!("Bridge daemon stopped");
        Ok(())
    }

    /// Bootstrap catch-up: tight cadence until the cursor is within the
    /// configured margin of the source tip, with a bounded iteration
    /// count so genesis tooling terminates.
    pub async fn run_bootstrap(&self) -> Result<PassReport, BridgeError> {
        info!(
            "Bootstrap catch-up: margin {}, max {} iterations",
            self.bootstrap_margin, self.bootstrap_max_iterations
        );
        let mut last = PassReport::default();

        for iteration in 0..self.bootstrap_max_iterations {
            if self.cancelled() {
                info!("Bootstrap cancelled at iteration {}", iteration);
                break;
            }
            match self.run_pass().await {
                Ok(report) => {
                    let cursor = self.progress.get().await?.height;
                    last = report;
                    if last.source_tip.saturating_sub(cursor) <= self.bootstrap_margin {
                        info!(
                            "Bootstrap caught up: cursor {} within {} of tip {}",
                            cursor, self.bootstrap_margin, last.source_tip
                        );
                        return Ok(last);
                    }
                }
                Err(e) => error!("Bootstrap pass failed: {}", e),
            }
            self.sleep_cancellable(self.bootstrap_interval).await;
        }
        Ok(last)
    }

    /// Sleep in short slices so stop requests apply promptly.
    async fn sleep_cancellable(&self, total: Duration) {
        let slice = Duration::from_millis(250);
        let mut remaining = total;
        while remaining > Duration::ZERO && !self.cancelled() {
            let step = remaining.min(slice);
            sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
    }
}
