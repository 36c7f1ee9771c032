//! Client configuration model.
//!
//! One `ClientConfig` describes one target network. Components receive it (or
//! the piece they need) at construction time; nothing reads it from a global.

use std::time::Duration;

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Network the workflows are built for.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Retry behavior for flaky read-only calls.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Slippage (percent) applied when a run does not supply its own.
    #[serde(default)]
    pub default_slippage: Option<f64>,
}

/// Connection and contract settings for a single network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// JSON-RPC endpoint used for read-only calls.
    pub rpc_url: String,
    #[serde(default)]
    pub contracts: ContractAddresses,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contracts: ContractAddresses::default(),
        }
    }
}

/// Addresses of the contracts that interpret serialized workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddresses {
    /// Protocol diamond exposing `farm` and `advancedFarm`.
    pub beanstalk: Address,
    /// Depot exposing `advancedPipe`.
    pub depot: Address,
    /// Pipeline executing the individual pipe calls.
    pub pipeline: Address,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            beanstalk: address!("c1e088fc1323b20bcbee9bd1b9fc9546db5624c5"),
            depot: address!("deb0f000082fd56c10f449d4f8497682494da84d"),
            pipeline: address!("b1be0000c6b3c62749b5f0c92480146452d15423"),
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 500,
        }
    }
}
