use thiserror::Error;

/// Errors from talking to either chain node.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC connection failed: {0}")]
    Connection(String),

    #[error("RPC error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Failed to parse RPC response: {0}")]
    Parse(String),

    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    #[error("Transaction not found: {0}")]
    TxNotFound(String),
}

impl RpcError {
    /// Transient errors end the current pass early and are retried next
    /// interval. Server-side rejections carry their own classification.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Connection(_) | RpcError::Parse(_))
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Header relay failed after {attempts} attempts on range starting at {from}")]
    HeaderRelayFailed { from: u64, attempts: u32 },

    #[error("Re-org detected at height {height}: ledger has {ledger_hash}, scanned {scanned_hash}")]
    ReorgDetected {
        height: u64,
        ledger_hash: String,
        scanned_hash: String,
    },

    #[error("Proof construction failed for {txid}: {reason}")]
    ProofConstruction { txid: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another instance appears to be running (marker: {0})")]
    InstanceLocked(String),
}
