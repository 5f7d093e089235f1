//! Bot configuration from the environment.
//!
//! Contract addresses and the signing key have no sane defaults; missing
//! or unparsable values abort startup. Everything else defaults to the
//! values the bot has always run with.

use alloy::primitives::Address;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable names.
pub mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const PLATFORM_ADDRESS: &str = "PLATFORM_ADDRESS";
    pub const TOKEN_ADDRESS: &str = "TOKEN_ADDRESS";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const CHAIN_ID: &str = "CHAIN_ID";
    pub const POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
    pub const CALL_TIMEOUT_SECS: &str = "CALL_TIMEOUT_SECS";
    pub const SKIP_FUNDING: &str = "SKIP_FUNDING";
}

/// Default scan interval, in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// Default per-call timeout for ledger round trips, in seconds.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// Default chain id (Hardhat local node).
const DEFAULT_CHAIN_ID: u64 = 31337;

/// Consecutive liquidation failures on one loan before escalating.
const DEFAULT_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// Fatal startup configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration for the monitor.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// HTTP RPC endpoint
    pub rpc_url: String,
    /// LendingPlatform contract
    pub platform_address: Address,
    /// LendingToken contract
    pub token_address: Address,
    /// Liquidator signing key (hex, 0x-prefix optional)
    pub private_key: String,
    pub chain_id: u64,
    /// Scan interval
    pub poll_interval: Duration,
    /// Per-call timeout on ledger round trips
    pub call_timeout: Duration,
    /// Consecutive failures on one loan before a warning escalates
    pub failure_alert_threshold: u32,
    /// Skip the best-effort faucet/approve startup step
    pub skip_funding: bool,
}

impl BotConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rpc_url: require(env::RPC_URL)?,
            platform_address: parse_required(env::PLATFORM_ADDRESS)?,
            token_address: parse_required(env::TOKEN_ADDRESS)?,
            private_key: require(env::PRIVATE_KEY)?,
            chain_id: parse_optional(env::CHAIN_ID, DEFAULT_CHAIN_ID)?,
            poll_interval: Duration::from_secs(parse_optional(
                env::POLL_INTERVAL_SECS,
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            call_timeout: Duration::from_secs(parse_optional(
                env::CALL_TIMEOUT_SECS,
                DEFAULT_CALL_TIMEOUT_SECS,
            )?),
            failure_alert_threshold: DEFAULT_FAILURE_ALERT_THRESHOLD,
            skip_funding: std::env::var(env::SKIP_FUNDING).is_ok_and(|v| v == "1" || v == "true"),
        })
    }

    /// Log the active configuration, signing key excluded.
    pub fn log(&self) {
        info!(
            rpc = %self.rpc_url,
            platform = %self.platform_address,
            token = %self.token_address,
            chain_id = self.chain_id,
            poll_interval_secs = self.poll_interval.as_secs(),
            call_timeout_secs = self.call_timeout.as_secs(),
            skip_funding = self.skip_funding,
            "Configuration loaded"
        );
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_required<T>(name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    require(name)?.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_optional<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_var_names_the_variable() {
        let err = require("LENDBOT_TEST_DOES_NOT_EXIST").unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing environment variable LENDBOT_TEST_DOES_NOT_EXIST"
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_POLL_INTERVAL_SECS, 3);
        let parsed: u64 = parse_optional("LENDBOT_TEST_DOES_NOT_EXIST", 3).unwrap();
        assert_eq!(parsed, 3);
    }
}
