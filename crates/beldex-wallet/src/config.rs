//! Wallet engine configuration.

use crate::error::WalletError;
use beldex_types::constants::DEFAULT_RING_SIZE;
use beldex_types::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Pause between automatic sync steps.
    pub refresh_interval_ms: u64,
    /// Blocks applied per sync step.
    pub max_blocks_per_step: usize,
    /// Height a fresh scan starts from (wallet birthday).
    pub refresh_from_height: u64,
    /// Minimum age before the cached daemon height is refetched.
    pub daemon_height_throttle_ms: u64,
    /// Cached daemon height older than this is refetched on query.
    pub daemon_height_max_age_ms: u64,
    /// How long `stop` waits for the sync loop to exit.
    pub stop_timeout_ms: u64,
    /// Cap on the retry backoff after daemon failures.
    pub max_backoff_ms: u64,
    pub ring_size: usize,
    /// Subaddresses scanned beyond the last used one: (accounts, addresses).
    pub subaddress_lookahead: (u32, u32),
    pub long_poll_interval_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            refresh_interval_ms: 10_000,
            max_blocks_per_step: 1000,
            refresh_from_height: 0,
            daemon_height_throttle_ms: 30_000,
            daemon_height_max_age_ms: 120_000,
            stop_timeout_ms: 5_000,
            max_backoff_ms: 60_000,
            ring_size: DEFAULT_RING_SIZE,
            subaddress_lookahead: (2, 50),
            long_poll_interval_ms: 1_000,
        }
    }
}

impl WalletConfig {
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WalletError::Config(e.to_string()))?;
        if config.ring_size == 0 || config.max_blocks_per_step == 0 {
            return Err(WalletError::Config("ring_size and max_blocks_per_step must be > 0".into()));
        }
        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn daemon_height_throttle(&self) -> Duration {
        Duration::from_millis(self.daemon_height_throttle_ms)
    }

    pub fn daemon_height_max_age(&self) -> Duration {
        Duration::from_millis(self.daemon_height_max_age_ms)
    }

    pub fn long_poll_interval(&self) -> Duration {
        Duration::from_millis(self.long_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = WalletConfig::default();
        assert_eq!(c.refresh_interval(), Duration::from_secs(10));
        assert_eq!(c.ring_size, 10);
        assert_eq!(c.stop_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_json_partial() {
        let c = WalletConfig::from_json(r#"{"network":"testnet","refresh_interval_ms":250}"#).unwrap();
        assert_eq!(c.network, Network::Testnet);
        assert_eq!(c.refresh_interval_ms, 250);
        assert_eq!(c.max_blocks_per_step, 1000);
        assert!(WalletConfig::from_json(r#"{"ring_size":0}"#).is_err());
        assert!(WalletConfig::from_json("nope").is_err());
    }
}
