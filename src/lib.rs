//! burnlink - Burn-to-Mint Bridge Daemon
//!
//! Watches a Bitcoin-compatible source chain for tagged burn outputs,
//! relays block headers to a destination ledger, and submits inclusion
//! proofs so the ledger can mint against each burn exactly once.
//!
//! # Modules
//!
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - RPC and bridge error taxonomy
//! - [`source`] - Source chain JSON-RPC reader (bitcoind-compatible)
//! - [`destination`] - Destination ledger JSON-RPC client
//! - [`script`] - OP_RETURN burn-tag recognition
//! - [`merkle`] - Double-SHA256 merkle branches for fallback proofs
//! - [`header_relay`] - Batched raw-header relay to the ledger
//! - [`progress`] - Reorg-checked monotonic scan cursor
//! - [`scanner`] - Burn candidate scanning over height ranges
//! - [`claims`] - Claim submission with merkle-branch fallback
//! - [`daemon`] - The pass loop tying it all together
//! - [`state`] - State directory: instance lock, stop sentinel

pub mod claims;
pub mod config;
pub mod daemon;
pub mod destination;
pub mod error;
pub mod header_relay;
pub mod logging;
pub mod merkle;
pub mod progress;
pub mod scanner;
pub mod script;
pub mod source;
pub mod state;

// Convenient re-exports at crate root
pub use claims::{ClaimSubmitter, SubmitResult};
pub use config::Config;
pub use daemon::{BridgeDaemon, PassReport, ShutdownSignal, safe_height};
pub use destination::{
    BranchClaim, ClaimOutcome, ClaimRecord, ClaimStatus, DestinationLedger, LedgerClient,
    MockLedger,
};
pub use error::{BridgeError, RpcError};
pub use header_relay::HeaderRelay;
pub use progress::{ProgressStore, ScanProgress};
pub use scanner::{BurnCandidate, BurnScanner};
pub use source::{BitcoinReader, MockSourceChain, SourceBlock, SourceChainReader, SourceTx};
pub use state::StateDir;
