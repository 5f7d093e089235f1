//! Read/write access to the lending platform contract.
//!
//! `LedgerClient` is the only module that talks to the platform directly.
//! Everything it hands out is decoded and validated here, so the monitor
//! never sees raw contract tuples.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::contracts::{ILendingPlatform, LoanRecord};
use crate::error::LedgerError;
use crate::signer::TransactionSender;

/// A decoded, validated loan record.
#[derive(Debug, Clone, Serialize)]
pub struct Loan {
    /// 1-based id, never reused
    pub id: u64,
    pub borrower: Address,
    /// Zero until a lender funds the loan
    pub lender: Address,
    /// Borrowed amount in token units
    pub principal: U256,
    /// Posted collateral in native-coin units, fixed at request time
    pub collateral: U256,
    /// Owed on top of principal at repayment
    pub interest: U256,
    /// Unix seconds, set when funded
    pub start_time: u64,
    pub duration_secs: u64,
    pub active: bool,
    pub funded: bool,
    /// Opaque off-chain agreement reference
    pub agreement_uri: String,
    pub agreement_hash: B256,
}

impl Loan {
    /// Only active, funded loans carry collateral worth evaluating.
    pub fn is_evaluable(&self) -> bool {
        self.active && self.funded
    }
}

impl TryFrom<LoanRecord> for Loan {
    type Error = LedgerError;

    fn try_from(record: LoanRecord) -> Result<Self, Self::Error> {
        let as_u64 = |value: U256, field: &str| -> Result<u64, LedgerError> {
            value
                .try_into()
                .map_err(|_| LedgerError::Decoding(format!("{field} out of range: {value}")))
        };

        Ok(Self {
            id: as_u64(record.id, "id")?,
            borrower: record.borrower,
            lender: record.lender,
            principal: record.amount,
            collateral: record.collateralAmount,
            interest: record.interest,
            start_time: as_u64(record.startTime, "startTime")?,
            duration_secs: as_u64(record.duration, "duration")?,
            active: record.active,
            funded: record.funded,
            agreement_uri: record.ipfsHash,
            agreement_hash: record.loanAgreementHash,
        })
    }
}

/// Confirmation of a submitted liquidation.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// The read/write surface the monitor needs from the lending platform.
///
/// Kept minimal on purpose: the monitor's health check is a prediction,
/// the platform's own check at `liquidate` time is authoritative.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current highest assigned loan id (0 if none).
    async fn loan_count(&self) -> Result<u64, LedgerError>;

    /// Full record for `id`. Ids can vanish between a count read and a
    /// detail read; that surfaces as `NotFound`, not `Decoding`.
    async fn get_loan(&self, id: u64) -> Result<Loan, LedgerError>;

    /// The platform's authoritative collateral price, 1e18 fixed-point.
    async fn collateral_price(&self) -> Result<U256, LedgerError>;

    /// Submit a liquidation for `id` and wait for confirmation.
    async fn liquidate(&self, id: u64) -> Result<Receipt, LedgerError>;
}

/// Alloy-backed `Ledger` implementation.
pub struct LedgerClient {
    http_url: String,
    platform: Address,
    sender: Arc<TransactionSender>,
}

impl LedgerClient {
    /// Create a client and verify the endpoint answers.
    pub async fn connect(
        http_url: &str,
        platform: Address,
        sender: Arc<TransactionSender>,
    ) -> Result<Self, LedgerError> {
        let provider = ProviderBuilder::new()
            .on_http(http_url.parse().map_err(connectivity)?);
        let block = provider.get_block_number().await.map_err(connectivity)?;
        info!(platform = %platform, block = block, "Ledger connection verified");

        Ok(Self {
            http_url: http_url.to_string(),
            platform,
            sender,
        })
    }
}

fn connectivity(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Connectivity(err.to_string())
}

#[async_trait]
impl Ledger for LedgerClient {
    async fn loan_count(&self) -> Result<u64, LedgerError> {
        let provider =
            ProviderBuilder::new().on_http(self.http_url.parse().map_err(connectivity)?);
        let contract = ILendingPlatform::new(self.platform, &provider);

        let count = contract.loanCounter().call().await.map_err(connectivity)?._0;
        count
            .try_into()
            .map_err(|_| LedgerError::Decoding(format!("loanCounter out of range: {count}")))
    }

    async fn get_loan(&self, id: u64) -> Result<Loan, LedgerError> {
        let provider =
            ProviderBuilder::new().on_http(self.http_url.parse().map_err(connectivity)?);
        let contract = ILendingPlatform::new(self.platform, &provider);

        let record = contract
            .getLoanDetails(U256::from(id))
            .call()
            .await
            .map_err(connectivity)?
            ._0;

        // The mapping returns a zeroed struct for unassigned ids.
        if record.borrower == Address::ZERO {
            return Err(LedgerError::NotFound(id));
        }

        let loan = Loan::try_from(record)?;
        if loan.id != id {
            return Err(LedgerError::Decoding(format!(
                "requested loan #{id}, platform returned #{}",
                loan.id
            )));
        }

        debug!(
            id = loan.id,
            principal = %loan.principal,
            collateral = %loan.collateral,
            active = loan.active,
            funded = loan.funded,
            "Fetched loan"
        );
        Ok(loan)
    }

    async fn collateral_price(&self) -> Result<U256, LedgerError> {
        let provider =
            ProviderBuilder::new().on_http(self.http_url.parse().map_err(connectivity)?);
        let contract = ILendingPlatform::new(self.platform, &provider);

        // Zero is a legitimate quote here: the admin can pin the price
        // anywhere, and the platform's own check happily evaluates
        // collateral value 0. Filtering it would mean never liquidating.
        Ok(contract.getEthPrice().call().await.map_err(connectivity)?._0)
    }

    async fn liquidate(&self, id: u64) -> Result<Receipt, LedgerError> {
        let calldata = ILendingPlatform::liquidateCall { _id: U256::from(id) }.abi_encode();
        self.sender
            .send_transaction(self.platform, calldata.into())
            .await
    }
}
