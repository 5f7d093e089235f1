//! Borrowed-asset token access.
//!
//! The liquidator has to hold and approve enough of the borrowed token to
//! repay a loan's principal when it seizes collateral. On the demo chain
//! the token ships with a faucet, so funding is a best-effort startup step
//! rather than an operational requirement.

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol_types::SolCall;
use std::sync::Arc;
use tracing::info;

use crate::contracts::ILendingToken;
use crate::error::LedgerError;
use crate::signer::TransactionSender;

/// Allowance granted to the platform at startup: 100,000 whole tokens.
const APPROVE_AMOUNT_WHOLE: u64 = 100_000;

/// Client for the lending token (the borrowed asset).
pub struct TokenClient {
    http_url: String,
    token: Address,
    platform: Address,
    sender: Arc<TransactionSender>,
}

impl TokenClient {
    pub fn new(
        http_url: &str,
        token: Address,
        platform: Address,
        sender: Arc<TransactionSender>,
    ) -> Self {
        Self {
            http_url: http_url.to_string(),
            token,
            platform,
            sender,
        }
    }

    /// Token balance of `account`.
    pub async fn balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        let provider = ProviderBuilder::new().on_http(
            self.http_url
                .parse()
                .map_err(|e| LedgerError::Connectivity(format!("{e}")))?,
        );
        let contract = ILendingToken::new(self.token, &provider);
        let balance = contract
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| LedgerError::Connectivity(e.to_string()))?
            ._0;
        Ok(balance)
    }

    /// Mint from the faucet and approve the platform to pull repayments.
    ///
    /// The faucet reverts once the account already drew its allotment, so
    /// callers treat failure as non-fatal and keep running with whatever
    /// balance the account has.
    pub async fn fund_and_approve(&self) -> Result<(), LedgerError> {
        let faucet = ILendingToken::faucetCall {}.abi_encode();
        self.sender.send_transaction(self.token, faucet.into()).await?;

        let wad = U256::from(10u64).pow(U256::from(18u64));
        let allowance = U256::from(APPROVE_AMOUNT_WHOLE) * wad;
        let approve = ILendingToken::approveCall {
            spender: self.platform,
            amount: allowance,
        }
        .abi_encode();
        self.sender.send_transaction(self.token, approve.into()).await?;

        let balance = self.balance_of(self.sender.address).await?;
        info!(
            token = %self.token,
            balance = %balance,
            allowance = %allowance,
            "Liquidator funded and approved"
        );
        Ok(())
    }
}
