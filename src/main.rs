//! Liquidation bot for the P2P lending platform.
//!
//! Watches every loan on the platform, re-checks collateral value against
//! the 105% threshold on each tick, and submits `liquidate` for anything
//! under water. Runs forever; only a configuration or startup failure
//! exits with a non-zero status.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lendbot_chain::{LedgerClient, TokenClient, TransactionSender};
use lendbot_core::{BotConfig, Monitor, MonitorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lendbot_core=debug,lendbot_chain=debug")),
        )
        .init();

    info!("Starting liquidation bot");

    let config = BotConfig::from_env().context("invalid configuration")?;
    config.log();

    let sender = Arc::new(
        TransactionSender::connect(&config.private_key, &config.rpc_url, config.chain_id)
            .await
            .context("cannot establish signing identity")?,
    );

    let ledger = Arc::new(
        LedgerClient::connect(&config.rpc_url, config.platform_address, sender.clone())
            .await
            .context("cannot reach lending platform")?,
    );

    // Best-effort: the faucet reverts once this account already drew its
    // allotment, and the bot is still useful with a prior balance.
    if config.skip_funding {
        info!("Skipping startup funding");
    } else {
        let token = TokenClient::new(
            &config.rpc_url,
            config.token_address,
            config.platform_address,
            sender.clone(),
        );
        if let Err(e) = token.fund_and_approve().await {
            warn!(error = %e, "Could not fund liquidator, continuing with existing balance");
        }
    }

    let monitor = Arc::new(Monitor::new(ledger, MonitorConfig::from(&config)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await;
    Ok(())
}
