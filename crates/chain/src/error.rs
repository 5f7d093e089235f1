//! Error taxonomy for ledger interaction.

use thiserror::Error;

/// Failure modes when talking to the lending platform.
///
/// The monitor keys its skip/continue policy off these variants, so the
/// boundary code must classify rather than bubble raw transport errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Transient network or endpoint failure. Retried naturally by the
    /// next scheduled scan.
    #[error("ledger unreachable: {0}")]
    Connectivity(String),

    /// Loan id vanished or never existed at read time.
    #[error("loan #{0} not found")]
    NotFound(u64),

    /// The platform refused the liquidation. Expected when another actor
    /// liquidated first or the borrower repaid between detection and
    /// execution; not a monitor bug.
    #[error("liquidation rejected: {0}")]
    ActionRejected(String),

    /// A call returned data that does not decode into the expected shape.
    #[error("malformed ledger response: {0}")]
    Decoding(String),
}

impl LedgerError {
    /// Classify an RPC/transport error for a state-changing call.
    ///
    /// Reverts surface through several layers (gas estimation, receipt
    /// status), all of which stringify with "revert" somewhere.
    pub fn from_send_failure(err: impl std::fmt::Display) -> Self {
        let msg = err.to_string();
        if msg.to_ascii_lowercase().contains("revert") {
            Self::ActionRejected(msg)
        } else {
            Self::Connectivity(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failure_classification() {
        let rejected = LedgerError::from_send_failure("execution reverted: Loan is healthy");
        assert!(matches!(rejected, LedgerError::ActionRejected(_)));

        let rejected = LedgerError::from_send_failure("Transaction REVERTED: 0xabc");
        assert!(matches!(rejected, LedgerError::ActionRejected(_)));

        let transient = LedgerError::from_send_failure("connection refused");
        assert!(matches!(transient, LedgerError::Connectivity(_)));
    }

    #[test]
    fn test_display_includes_loan_id() {
        let err = LedgerError::NotFound(7);
        assert_eq!(err.to_string(), "loan #7 not found");
    }
}
