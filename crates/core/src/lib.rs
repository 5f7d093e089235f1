//! Liquidation monitor core logic.
//!
//! This crate provides:
//! - Fixed-point collateralization math mirroring the platform's check
//! - The scan loop with per-loan failure isolation and an in-flight guard
//! - Environment-driven configuration with fatal startup validation
//! - Consecutive-failure tracking so stuck loans get surfaced

pub mod config;
mod failures;
pub mod math;
mod monitor;

pub use config::{BotConfig, ConfigError};
pub use failures::FailureTracker;
pub use monitor::{LoanOutcome, Monitor, MonitorConfig, ScanSummary};
