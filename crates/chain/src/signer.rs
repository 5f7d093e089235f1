//! Transaction signing and submission.
//!
//! One signing identity issues every liquidation, and the scan loop awaits
//! each submission before moving on, so transactions serialize naturally.
//! The nonce is still cached locally to avoid an RPC round trip per
//! submission, and resynced from chain whenever a submission fails.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::ledger::Receipt;

/// Gas limit for a platform liquidation call. The demo platform's
/// `liquidate` does two transfers and a few storage writes; 500k leaves
/// ample headroom without tripping block limits on a dev chain.
const LIQUIDATION_GAS_LIMIT: u64 = 500_000;

/// Locally cached nonce, incremented per submission.
struct NonceCache {
    current: AtomicU64,
}

impl NonceCache {
    fn new(initial: u64) -> Self {
        Self {
            current: AtomicU64::new(initial),
        }
    }

    #[inline]
    fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs and sends transactions from the monitor's single identity.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
    chain_id: u64,
    nonce: NonceCache,
}

impl TransactionSender {
    /// Create a sender from a private key, fetching the starting nonce.
    ///
    /// Fails if the key does not parse or the endpoint is unreachable;
    /// both are startup errors, not something a scan can recover from.
    pub async fn connect(
        private_key: &str,
        rpc_url: &str,
        chain_id: u64,
    ) -> Result<Self, LedgerError> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| LedgerError::Decoding(format!("invalid private key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new()
            .on_http(rpc_url.parse().map_err(|e| LedgerError::Connectivity(format!("{e}")))?);
        let initial_nonce = provider
            .get_transaction_count(address)
            .await
            .map_err(|e| LedgerError::Connectivity(e.to_string()))?;

        info!(
            address = %address,
            chain_id = chain_id,
            initial_nonce = initial_nonce,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonce: NonceCache::new(initial_nonce),
        })
    }

    /// Send a transaction and wait for its receipt.
    ///
    /// A revert (at estimation, submission, or in the receipt) comes back
    /// as `ActionRejected`; anything else transient is `Connectivity`.
    /// Either way the cached nonce is resynced so the next submission
    /// does not inherit a gap.
    pub async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
    ) -> Result<Receipt, LedgerError> {
        let nonce = self.nonce.next();

        debug!(
            to = %to,
            nonce = nonce,
            calldata_len = calldata.len(),
            "Sending transaction"
        );

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata)
            .with_value(U256::ZERO)
            .with_nonce(nonce)
            .with_gas_limit(LIQUIDATION_GAS_LIMIT)
            .with_chain_id(self.chain_id);

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|e| LedgerError::Connectivity(format!("{e}")))?,
            );

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                self.resync_nonce().await;
                return Err(LedgerError::from_send_failure(e));
            }
        };
        let tx_hash = *pending.tx_hash();

        let receipt = match pending.get_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.resync_nonce().await;
                return Err(LedgerError::Connectivity(e.to_string()));
            }
        };

        if receipt.status() {
            debug!(
                tx_hash = %tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                "Transaction confirmed"
            );
            Ok(Receipt {
                tx_hash,
                block_number: receipt.block_number.unwrap_or(0),
                gas_used: receipt.gas_used as u64,
            })
        } else {
            self.resync_nonce().await;
            Err(LedgerError::ActionRejected(format!(
                "transaction reverted: {tx_hash}"
            )))
        }
    }

    /// Pull the nonce back from chain after a failed submission.
    async fn resync_nonce(&self) {
        let provider = match self.rpc_url.parse() {
            Ok(url) => ProviderBuilder::new().on_http(url),
            Err(_) => return,
        };
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonce.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce resynced from chain");
            }
            Err(e) => {
                warn!(error = %e, "Failed to resync nonce");
            }
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .finish_non_exhaustive()
    }
}
