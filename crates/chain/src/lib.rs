//! Chain interaction layer for the liquidation monitor.
//!
//! This crate provides:
//! - Contract bindings for the LendingPlatform and LendingToken
//! - The `Ledger` trait and its alloy-backed `LedgerClient`
//! - Decoding/validation of contract tuples into domain types
//! - Transaction signing and sending with a locally cached nonce
//! - Token funding/approval for the liquidator identity

mod contracts;
mod error;
mod ledger;
mod signer;
mod token;

pub use contracts::{ILendingPlatform, ILendingToken, LoanRecord};
pub use error::LedgerError;
pub use ledger::{Ledger, LedgerClient, Loan, Receipt};
pub use signer::TransactionSender;
pub use token::TokenClient;
