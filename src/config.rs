use crate::error::BridgeError;
use serde::Deserialize;
use std::fs;

/// Top-level daemon configuration, loaded from YAML.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub source: SourceNodeConfig,
    pub destination: DestinationNodeConfig,
    pub relay: RelayConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    /// Daemon state directory: pid marker, stop sentinel, progress mirror,
    /// scan cache.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_state_dir() -> String {
    "./data/burnlink".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub use_json: bool,
    pub rotation: String,
}

/// Source chain node (bitcoind-compatible JSON-RPC).
#[derive(Debug, Deserialize, Clone)]
pub struct SourceNodeConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Warn when the source tip's block time lags wall clock by more than this.
    #[serde(default = "default_max_block_lag")]
    pub max_block_lag_seconds: i64,
}

fn default_max_block_lag() -> i64 {
    3600
}

/// Destination ledger node JSON-RPC.
#[derive(Debug, Deserialize, Clone)]
pub struct DestinationNodeConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Fixed source-chain height below which headers/burns are never tracked.
    pub checkpoint_height: u64,
    /// Confirmation depth K: the safe height is source tip minus this.
    pub confirmations: u64,
    #[serde(default = "default_header_batch")]
    pub header_batch: u64,
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,
}

fn default_header_batch() -> u64 {
    500
}

fn default_max_batch_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub poll_interval_secs: u64,
    /// Heights scanned per chunk; cancellation is checked between chunks.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Cap on newly submitted claims per source block. Already-claimed
    /// txids do not count toward it; authoritative enforcement lives in
    /// the destination ledger.
    #[serde(default = "default_max_claims_per_block")]
    pub max_claims_per_block: usize,
    /// Keep an advisory on-disk cache of found burns per scanned range.
    #[serde(default)]
    pub cache_enabled: bool,
}

fn default_chunk_size() -> u64 {
    100
}

fn default_max_claims_per_block() -> usize {
    64
}

/// Bootstrap catch-up: same pass logic on a tight cadence until the scan
/// is within `catchup_margin` of the source tip.
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    pub interval_secs: u64,
    pub catchup_margin: u64,
    pub max_iterations: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            catchup_margin: 12,
            max_iterations: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, then apply environment
    /// overrides for node endpoints and credentials.
    pub fn from_file(path: &str) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path, e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Credentials and URLs may come from the environment instead of the
    /// config file (deployment keeps secrets out of YAML).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BURNLINK_SOURCE_RPC_URL") {
            self.source.url = v;
        }
        if let Ok(v) = std::env::var("BURNLINK_SOURCE_RPC_USER") {
            self.source.user = v;
        }
        if let Ok(v) = std::env::var("BURNLINK_SOURCE_RPC_PASSWORD") {
            self.source.password = v;
        }
        if let Ok(v) = std::env::var("BURNLINK_DEST_RPC_URL") {
            self.destination.url = v;
        }
        if let Ok(v) = std::env::var("BURNLINK_DEST_RPC_USER") {
            self.destination.user = Some(v);
        }
        if let Ok(v) = std::env::var("BURNLINK_DEST_RPC_PASSWORD") {
            self.destination.password = Some(v);
        }
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.relay.confirmations == 0 {
            return Err(BridgeError::Config(
                "relay.confirmations must be at least 1".to_string(),
            ));
        }
        if self.relay.header_batch == 0 {
            return Err(BridgeError::Config(
                "relay.header_batch must be at least 1".to_string(),
            ));
        }
        if self.scan.chunk_size == 0 {
            return Err(BridgeError::Config(
                "scan.chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log:
  level: "info"
  dir: "./logs"
  file: "burnlinkd.log"
  use_json: false
  rotation: "daily"
source:
  url: "http://127.0.0.1:8332"
  user: "rpc"
  password: "rpc"
destination:
  url: "http://127.0.0.1:9332"
relay:
  checkpoint_height: 286000
  confirmations: 6
scan:
  poll_interval_secs: 60
"#;

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();

        assert_eq!(config.relay.checkpoint_height, 286_000);
        assert_eq!(config.relay.confirmations, 6);
        assert_eq!(config.relay.header_batch, 500);
        assert_eq!(config.relay.max_batch_retries, 3);
        assert_eq!(config.scan.poll_interval_secs, 60);
        assert_eq!(config.scan.chunk_size, 100);
        assert_eq!(config.scan.max_claims_per_block, 64);
        assert!(!config.scan.cache_enabled);
        assert_eq!(config.bootstrap.interval_secs, 2);
        assert_eq!(config.bootstrap.catchup_margin, 12);
        assert_eq!(config.state_dir, "./data/burnlink");
        assert!(config.destination.user.is_none());
    }

    #[test]
    fn test_zero_confirmations_rejected() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.relay.confirmations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_lag_default() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.source.max_block_lag_seconds, 3600);
    }
}
