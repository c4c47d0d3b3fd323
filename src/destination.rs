//! Destination ledger client.
//!
//! Read/write client against the destination ledger node: header
//! ingestion, scan-progress record, and the burn-claim lifecycle. The
//! ledger owns claim state (pending -> final) and performs the mint once
//! enough finalized claims land; this client only submits and queries.

use crate::error::RpcError;
use crate::progress::ScanProgress;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

/// Claim status as tracked by the destination ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Final,
}

/// A burn-claim record owned by the destination ledger. Read-only here,
/// surfaced for diagnostics (`status` command).
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRecord {
    pub txid: String,
    pub status: ClaimStatus,
    pub amount: Decimal,
    pub destination: String,
}

/// Outcome of a claim submission. Transport failures surface as
/// `RpcError`; ledger-side rejections are classified here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Accepted,
    /// Duplicate submission: the ledger already has this claim. Treated
    /// as success everywhere.
    AlreadyKnown,
    /// Proof-format incompatibility, not a consensus rejection: the
    /// caller retries through the explicit merkle-branch path.
    RejectedFormat(String),
    /// Consensus-level rejection (dust amount, malformed tag, per-block
    /// cap). Terminal for this txid in the current chain state.
    RejectedConsensus(String),
}

/// Fallback claim form: explicit block binding plus a locally-computed
/// merkle branch and tx index.
#[derive(Debug, Clone)]
pub struct BranchClaim {
    pub txid: String,
    pub raw_tx: String,
    pub block_hash: String,
    pub height: u64,
    pub branch: Vec<String>,
    pub tx_index: u32,
}

#[async_trait]
pub trait DestinationLedger: Send + Sync {
    /// Height of the highest source header the ledger has accepted.
    async fn header_tip(&self) -> Result<u64, RpcError>;

    /// The ledger's own view of the source-header hash at a height.
    /// `None` below the checkpoint or past the relayed tip.
    async fn header_hash_at(&self, height: u64) -> Result<Option<String>, RpcError>;

    /// Submit a batch of raw source headers. Resubmitting already-known
    /// headers must not error; orphans (not chaining from checkpoint or
    /// an accepted header) are rejected.
    async fn submit_headers(&self, raw: &[String]) -> Result<(), RpcError>;

    /// Persisted scan cursor, or `None` before first advancement.
    async fn scan_progress(&self) -> Result<Option<ScanProgress>, RpcError>;

    /// Write the scan cursor. The ledger validates the hash against its
    /// own header view and refuses regressions; returns whether the
    /// write was accepted.
    async fn set_scan_progress(&self, progress: &ScanProgress) -> Result<bool, RpcError>;

    /// Whether a claim for this source txid already exists.
    async fn claim_exists(&self, txid: &str) -> Result<bool, RpcError>;

    /// Primary verification entry point: raw tx plus the source node's
    /// packaged inclusion proof.
    async fn submit_claim_proof(
        &self,
        txid: &str,
        raw_tx: &str,
        proof: &str,
    ) -> Result<ClaimOutcome, RpcError>;

    /// Alternate entry point: explicit block hash, height, merkle branch
    /// and tx index.
    async fn submit_claim_branch(&self, claim: &BranchClaim) -> Result<ClaimOutcome, RpcError>;

    /// Claims filtered by status, for diagnostics.
    async fn list_claims(&self, status: Option<ClaimStatus>) -> Result<Vec<ClaimRecord>, RpcError>;
}

// ============================================================
// JSON-RPC CLIENT
// ============================================================

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct HeaderTipResult {
    height: u64,
}

#[derive(Deserialize)]
struct HeaderAtResult {
    hash: String,
}

// Ledger-side JSON-RPC error codes, mirrored from the node's RPC layer.
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;
const RPC_DESERIALIZATION_ERROR: i64 = -22;
const RPC_VERIFY_REJECTED: i64 = -26;

/// Destination ledger client over JSON-RPC.
pub struct LedgerClient {
    client: reqwest::Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
}

impl LedgerClient {
    pub fn new(url: &str, user: Option<&str>, password: Option<&str>) -> Result<Self, RpcError> {
        info!("Initializing destination ledger client at {}", url);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RpcError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, RpcError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(ref user) = self.user {
            builder = builder.basic_auth(user, self.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RpcError::Connection(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RpcError::Parse(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::Server {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| RpcError::Parse(format!("{}: no result in RPC response", method)))
    }

    /// Map a claim-submission RPC error onto the outcome taxonomy.
    fn classify_claim_error(err: RpcError) -> Result<ClaimOutcome, RpcError> {
        match err {
            RpcError::Server { code, message } => match code {
                RPC_VERIFY_ALREADY_IN_CHAIN => Ok(ClaimOutcome::AlreadyKnown),
                RPC_DESERIALIZATION_ERROR => Ok(ClaimOutcome::RejectedFormat(message)),
                RPC_VERIFY_REJECTED => Ok(ClaimOutcome::RejectedConsensus(message)),
                _ => Err(RpcError::Server { code, message }),
            },
            other => Err(other),
        }
    }
}

#[async_trait]
impl DestinationLedger for LedgerClient {
    async fn header_tip(&self) -> Result<u64, RpcError> {
        let tip: HeaderTipResult = self.rpc_call("relaygetheadertip", ()).await?;
        Ok(tip.height)
    }

    async fn header_hash_at(&self, height: u64) -> Result<Option<String>, RpcError> {
        let result: Option<HeaderAtResult> = self.rpc_call("relaygetheader", (height,)).await?;
        Ok(result.map(|r| r.hash))
    }

    async fn submit_headers(&self, raw: &[String]) -> Result<(), RpcError> {
        let _: serde_json::Value = self.rpc_call("relaysubmitheaders", (raw,)).await?;
        debug!("Submitted {} headers to ledger", raw.len());
        Ok(())
    }

    async fn scan_progress(&self) -> Result<Option<ScanProgress>, RpcError> {
        self.rpc_call("relaygetscanprogress", ()).await
    }

    async fn set_scan_progress(&self, progress: &ScanProgress) -> Result<bool, RpcError> {
        self.rpc_call(
            "relaysetscanprogress",
            (progress.height, progress.hash.as_str()),
        )
        .await
    }

    async fn claim_exists(&self, txid: &str) -> Result<bool, RpcError> {
        self.rpc_call("burnclaimexists", (txid,)).await
    }

    async fn submit_claim_proof(
        &self,
        txid: &str,
        raw_tx: &str,
        proof: &str,
    ) -> Result<ClaimOutcome, RpcError> {
        let result: Result<serde_json::Value, RpcError> =
            self.rpc_call("submitburnclaim", (txid, raw_tx, proof)).await;
        match result {
            Ok(_) => Ok(ClaimOutcome::Accepted),
            Err(e) => Self::classify_claim_error(e),
        }
    }

    async fn submit_claim_branch(&self, claim: &BranchClaim) -> Result<ClaimOutcome, RpcError> {
        let result: Result<serde_json::Value, RpcError> = self
            .rpc_call(
                "submitburnclaimmerkle",
                (
                    claim.txid.as_str(),
                    claim.raw_tx.as_str(),
                    claim.block_hash.as_str(),
                    claim.height,
                    &claim.branch,
                    claim.tx_index,
                ),
            )
            .await;
        match result {
            Ok(_) => Ok(ClaimOutcome::Accepted),
            Err(e) => Self::classify_claim_error(e),
        }
    }

    async fn list_claims(&self, status: Option<ClaimStatus>) -> Result<Vec<ClaimRecord>, RpcError> {
        let filter = status.map(|s| match s {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Final => "final",
        });
        self.rpc_call("listburnclaims", (filter,)).await
    }
}

// ============================================================
// MOCK LEDGER
// ============================================================

struct MockLedgerState {
    /// Header view: height -> source block hash, seeded at the checkpoint.
    headers: BTreeMap<u64, String>,
    progress: Option<ScanProgress>,
    claims: HashMap<String, ClaimRecord>,
    /// Reject the primary proof path with a format error.
    reject_primary: bool,
    /// Txids rejected at consensus level regardless of path.
    consensus_rejects: Vec<String>,
    /// Remaining header batches to fail, for retry tests.
    fail_header_batches: u32,
    /// Every claim submission attempt, in order (idempotence checks).
    submission_log: Vec<String>,
    /// Claims accepted through the fallback path.
    fallback_accepts: u32,
}

/// In-memory destination ledger for testing. Seeds its header view at
/// the checkpoint and enforces the same rules the real ledger does:
/// headers must chain, progress writes are hash-checked and monotonic,
/// duplicate claims are no-ops.
pub struct MockLedger {
    inner: Mutex<MockLedgerState>,
}

impl MockLedger {
    pub fn new(checkpoint_height: u64, checkpoint_hash: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(checkpoint_height, checkpoint_hash.to_string());
        Self {
            inner: Mutex::new(MockLedgerState {
                headers,
                progress: None,
                claims: HashMap::new(),
                reject_primary: false,
                consensus_rejects: Vec::new(),
                fail_header_batches: 0,
                submission_log: Vec::new(),
                fallback_accepts: 0,
            }),
        }
    }

    pub fn set_reject_primary(&self, reject: bool) {
        self.inner.lock().unwrap().reject_primary = reject;
    }

    pub fn add_consensus_reject(&self, txid: &str) {
        self.inner
            .lock()
            .unwrap()
            .consensus_rejects
            .push(txid.to_string());
    }

    pub fn fail_next_header_batches(&self, count: u32) {
        self.inner.lock().unwrap().fail_header_batches = count;
    }

    pub fn submission_count(&self, txid: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .submission_log
            .iter()
            .filter(|t| t.as_str() == txid)
            .count()
    }

    pub fn fallback_accepts(&self) -> u32 {
        self.inner.lock().unwrap().fallback_accepts
    }

    pub fn claim_count(&self) -> usize {
        self.inner.lock().unwrap().claims.len()
    }

    pub fn finalize_claim(&self, txid: &str) {
        if let Some(claim) = self.inner.lock().unwrap().claims.get_mut(txid) {
            claim.status = ClaimStatus::Final;
        }
    }

    fn accept_claim(state: &mut MockLedgerState, txid: &str) {
        state.claims.insert(
            txid.to_string(),
            ClaimRecord {
                txid: txid.to_string(),
                status: ClaimStatus::Pending,
                amount: Decimal::ZERO,
                destination: String::new(),
            },
        );
    }
}

#[async_trait]
impl DestinationLedger for MockLedger {
    async fn header_tip(&self) -> Result<u64, RpcError> {
        let state = self.inner.lock().unwrap();
        state
            .headers
            .keys()
            .next_back()
            .copied()
            .ok_or(RpcError::Connection("mock ledger has no headers".into()))
    }

    async fn header_hash_at(&self, height: u64) -> Result<Option<String>, RpcError> {
        Ok(self.inner.lock().unwrap().headers.get(&height).cloned())
    }

    async fn submit_headers(&self, raw: &[String]) -> Result<(), RpcError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_header_batches > 0 {
            state.fail_header_batches -= 1;
            return Err(RpcError::Connection("mock header ingest outage".into()));
        }
        for header in raw {
            // Mock raw headers carry "height:hash" (see source module)
            let (height_s, hash) = header
                .split_once(':')
                .ok_or_else(|| RpcError::Parse(format!("mock header {}", header)))?;
            let height: u64 = height_s
                .parse()
                .map_err(|e| RpcError::Parse(format!("mock header height: {}", e)))?;

            // Idempotent resubmission of a known header
            if state.headers.get(&height).map(String::as_str) == Some(hash) {
                continue;
            }
            // No orphan insertion: must extend an accepted header
            let tip = *state.headers.keys().next_back().unwrap_or(&0);
            if height != tip + 1 && !state.headers.contains_key(&height) {
                return Err(RpcError::Server {
                    code: -25,
                    message: format!("header at {} does not connect", height),
                });
            }
            state.headers.insert(height, hash.to_string());
        }
        Ok(())
    }

    async fn scan_progress(&self) -> Result<Option<ScanProgress>, RpcError> {
        Ok(self.inner.lock().unwrap().progress.clone())
    }

    async fn set_scan_progress(&self, progress: &ScanProgress) -> Result<bool, RpcError> {
        let mut state = self.inner.lock().unwrap();
        // Server-side validation mirrors the real ledger: the hash must
        // match its own header view and the cursor never moves backward.
        if state.headers.get(&progress.height) != Some(&progress.hash) {
            return Ok(false);
        }
        if let Some(ref current) = state.progress
            && progress.height < current.height
        {
            return Ok(false);
        }
        state.progress = Some(progress.clone());
        Ok(true)
    }

    async fn claim_exists(&self, txid: &str) -> Result<bool, RpcError> {
        Ok(self.inner.lock().unwrap().claims.contains_key(txid))
    }

    async fn submit_claim_proof(
        &self,
        txid: &str,
        _raw_tx: &str,
        _proof: &str,
    ) -> Result<ClaimOutcome, RpcError> {
        let mut state = self.inner.lock().unwrap();
        state.submission_log.push(txid.to_string());

        if state.claims.contains_key(txid) {
            return Ok(ClaimOutcome::AlreadyKnown);
        }
        if state.consensus_rejects.iter().any(|t| t == txid) {
            return Ok(ClaimOutcome::RejectedConsensus("burn below dust".into()));
        }
        if state.reject_primary {
            return Ok(ClaimOutcome::RejectedFormat(
                "unsupported proof encoding".into(),
            ));
        }
        Self::accept_claim(&mut state, txid);
        Ok(ClaimOutcome::Accepted)
    }

    async fn submit_claim_branch(&self, claim: &BranchClaim) -> Result<ClaimOutcome, RpcError> {
        let mut state = self.inner.lock().unwrap();
        state.submission_log.push(claim.txid.clone());

        if state.claims.contains_key(&claim.txid) {
            return Ok(ClaimOutcome::AlreadyKnown);
        }
        if state.consensus_rejects.iter().any(|t| t == &claim.txid) {
            return Ok(ClaimOutcome::RejectedConsensus("burn below dust".into()));
        }
        // The branch path must carry its explicit block binding
        if state.headers.get(&claim.height) != Some(&claim.block_hash) {
            return Ok(ClaimOutcome::RejectedFormat(
                "block hash unknown to header store".into(),
            ));
        }
        state.fallback_accepts += 1;
        Self::accept_claim(&mut state, &claim.txid);
        Ok(ClaimOutcome::Accepted)
    }

    async fn list_claims(&self, status: Option<ClaimStatus>) -> Result<Vec<ClaimRecord>, RpcError> {
        let state = self.inner.lock().unwrap();
        let mut claims: Vec<ClaimRecord> = state
            .claims
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.txid.cmp(&b.txid));
        Ok(claims)
    }
}
