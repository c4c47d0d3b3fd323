//! Source chain reader.
//!
//! Read-only client against the source chain node (bitcoind-compatible
//! JSON-RPC): tip height, block hash at height, full blocks with output
//! scripts, raw transactions, inclusion proofs, raw header batches.

use crate::error::RpcError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

/// A source-chain block reduced to what the scanner needs.
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub time: i64,
    pub txs: Vec<SourceTx>,
}

/// A transaction's identity plus its decoded output scripts, in block order.
#[derive(Debug, Clone)]
pub struct SourceTx {
    pub txid: String,
    pub output_scripts: Vec<Vec<u8>>,
}

/// Read-only interface to the source chain node.
#[async_trait]
pub trait SourceChainReader: Send + Sync {
    /// Current chain tip height.
    async fn tip_height(&self) -> Result<u64, RpcError>;

    /// Block time of the tip, for node-staleness reporting.
    async fn tip_time(&self) -> Result<i64, RpcError>;

    /// Canonical block hash at a height.
    async fn block_hash(&self, height: u64) -> Result<String, RpcError>;

    /// Full block with transaction bodies at a height.
    async fn block(&self, height: u64) -> Result<SourceBlock, RpcError>;

    /// Raw transaction hex by txid.
    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError>;

    /// Node-packaged transaction inclusion proof (`gettxoutproof`).
    async fn inclusion_proof(&self, txid: &str, block_hash: &str) -> Result<String, RpcError>;

    /// Raw header hex for `count` consecutive heights starting at `from`.
    async fn raw_headers(&self, from: u64, count: u64) -> Result<Vec<String>, RpcError>;
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

/// `getblock <hash> 2` result, reduced to required fields. Missing or
/// malformed fields fail closed as a parse error, never a silent zero.
#[derive(Deserialize)]
struct GetBlockResult {
    hash: String,
    height: u64,
    time: i64,
    #[serde(default)]
    previousblockhash: Option<String>,
    tx: Vec<GetBlockTx>,
}

#[derive(Deserialize)]
struct GetBlockTx {
    txid: String,
    vout: Vec<GetBlockVout>,
}

#[derive(Deserialize)]
struct GetBlockVout {
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

#[derive(Deserialize)]
struct ScriptPubKey {
    hex: String,
}

#[derive(Deserialize)]
struct GetBlockHeaderVerbose {
    time: i64,
}

/// Source chain reader over bitcoind JSON-RPC with HTTP basic auth.
pub struct BitcoinReader {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl BitcoinReader {
    pub fn new(url: &str, user: &str, password: &str) -> Result<Self, RpcError> {
        info!("Initializing source chain reader at {}", url);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RpcError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            user: user.to_string(),
            password: password.to_string(),
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

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
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
}

#[async_trait]
impl SourceChainReader for BitcoinReader {
    async fn tip_height(&self) -> Result<u64, RpcError> {
        self.rpc_call("getblockcount", ()).await
    }

    async fn tip_time(&self) -> Result<i64, RpcError> {
        let best: String = self.rpc_call("getbestblockhash", ()).await?;
        let header: GetBlockHeaderVerbose =
            self.rpc_call("getblockheader", (best, true)).await?;
        Ok(header.time)
    }

    async fn block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.rpc_call("getblockhash", (height,)).await
    }

    async fn block(&self, height: u64) -> Result<SourceBlock, RpcError> {
        let hash: String = self.block_hash(height).await?;
        // Verbosity 2: transaction bodies inline
        let block: GetBlockResult = self.rpc_call("getblock", (hash, 2)).await?;

        let mut txs = Vec::with_capacity(block.tx.len());
        for tx in block.tx {
            let mut output_scripts = Vec::with_capacity(tx.vout.len());
            for vout in tx.vout {
                let script = hex::decode(&vout.script_pub_key.hex).map_err(|e| {
                    RpcError::Parse(format!("script hex in tx {}: {}", tx.txid, e))
                })?;
                output_scripts.push(script);
            }
            txs.push(SourceTx {
                txid: tx.txid,
                output_scripts,
            });
        }

        debug!("Fetched source block {} ({} txs)", height, txs.len());
        Ok(SourceBlock {
            height: block.height,
            hash: block.hash,
            prev_hash: block.previousblockhash.unwrap_or_default(),
            time: block.time,
            txs,
        })
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        self.rpc_call("getrawtransaction", (txid, false)).await
    }

    async fn inclusion_proof(&self, txid: &str, block_hash: &str) -> Result<String, RpcError> {
        self.rpc_call("gettxoutproof", (vec![txid], block_hash))
            .await
    }

    async fn raw_headers(&self, from: u64, count: u64) -> Result<Vec<String>, RpcError> {
        let mut headers = Vec::with_capacity(count as usize);
        for height in from..from + count {
            let hash: String = self.block_hash(height).await?;
            let raw: String = self.rpc_call("getblockheader", (hash, false)).await?;
            headers.push(raw);
        }
        Ok(headers)
    }
}

// ============================================================
// MOCK SOURCE CHAIN
// ============================================================

#[derive(Default)]
struct MockChainState {
    blocks: BTreeMap<u64, SourceBlock>,
    raw_txs: HashMap<String, String>,
    tip_time: i64,
    fail_proofs: bool,
}

/// In-memory source chain for testing without a node. Interior mutability
/// lets tests extend or re-org the chain mid-run through a shared handle.
#[derive(Default)]
pub struct MockSourceChain {
    inner: Mutex<MockChainState>,
}

impl MockSourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block at `height` with the given transactions. Hash and
    /// prev-hash are derived deterministically from the height.
    pub fn add_block(&self, height: u64, txs: Vec<SourceTx>) {
        let mut state = self.inner.lock().unwrap();
        let block = SourceBlock {
            height,
            hash: mock_block_hash(height, 0),
            prev_hash: mock_block_hash(height.wrapping_sub(1), 0),
            time: 1_700_000_000 + height as i64 * 600,
            txs,
        };
        for tx in &block.txs {
            state
                .raw_txs
                .insert(tx.txid.clone(), format!("raw-{}", tx.txid));
        }
        state.tip_time = block.time;
        state.blocks.insert(height, block);
    }

    /// Replace the block at `height` with a different hash, simulating a
    /// re-org that changed the content at an already-observed height.
    pub fn reorg_block(&self, height: u64, fork: u8) {
        let mut state = self.inner.lock().unwrap();
        if let Some(block) = state.blocks.get_mut(&height) {
            block.hash = mock_block_hash(height, fork);
        }
    }

    /// Make `gettxoutproof` fail, forcing the fallback claim path.
    pub fn set_fail_proofs(&self, fail: bool) {
        self.inner.lock().unwrap().fail_proofs = fail;
    }

    fn get_block(&self, height: u64) -> Result<SourceBlock, RpcError> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .get(&height)
            .cloned()
            .ok_or(RpcError::BlockNotFound(height))
    }
}

/// Deterministic 64-hex-char mock block hash; `fork` selects a branch.
pub fn mock_block_hash(height: u64, fork: u8) -> String {
    format!("{:056x}{:06x}{:02x}", 0, height, fork)
}

/// Mock raw headers carry `height:hash` so a mock ledger can index them
/// without real header decoding.
pub fn mock_raw_header(height: u64, hash: &str) -> String {
    format!("{}:{}", height, hash)
}

#[async_trait]
impl SourceChainReader for MockSourceChain {
    async fn tip_height(&self) -> Result<u64, RpcError> {
        self.inner
            .lock()
            .unwrap()
            .blocks
            .keys()
            .next_back()
            .copied()
            .ok_or(RpcError::Connection("mock chain is empty".to_string()))
    }

    async fn tip_time(&self) -> Result<i64, RpcError> {
        Ok(self.inner.lock().unwrap().tip_time)
    }

    async fn block_hash(&self, height: u64) -> Result<String, RpcError> {
        Ok(self.get_block(height)?.hash)
    }

    async fn block(&self, height: u64) -> Result<SourceBlock, RpcError> {
        self.get_block(height)
    }

    async fn raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        self.inner
            .lock()
            .unwrap()
            .raw_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::TxNotFound(txid.to_string()))
    }

    async fn inclusion_proof(&self, txid: &str, block_hash: &str) -> Result<String, RpcError> {
        if self.inner.lock().unwrap().fail_proofs {
            return Err(RpcError::Server {
                code: -5,
                message: "tx not in active chain filter".to_string(),
            });
        }
        Ok(format!("proof-{}-{}", txid, block_hash))
    }

    async fn raw_headers(&self, from: u64, count: u64) -> Result<Vec<String>, RpcError> {
        let mut headers = Vec::with_capacity(count as usize);
        for height in from..from + count {
            let block = self.get_block(height)?;
            headers.push(mock_raw_header(height, &block.hash));
        }
        Ok(headers)
    }
}
