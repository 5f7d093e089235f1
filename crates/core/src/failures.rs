//! Consecutive-failure tracking per loan.
//!
//! A single failed liquidation is routine (another liquidator won the
//! race, the borrower repaid, the RPC hiccuped). The same loan failing
//! cycle after cycle is not, and gets escalated to a warning so an
//! operator can look at it.

use dashmap::DashMap;

/// Tracks consecutive liquidation failures per loan id.
#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: DashMap<u64, u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt; returns the new consecutive count.
    pub fn record_failure(&self, loan_id: u64) -> u32 {
        let mut entry = self.counts.entry(loan_id).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Clear the streak after a success, or once the loan reads healthy
    /// or closed again.
    pub fn clear(&self, loan_id: u64) {
        self.counts.remove(&loan_id);
    }

    /// Current consecutive failure count for a loan.
    pub fn count(&self, loan_id: u64) -> u32 {
        self.counts.get(&loan_id).map(|c| *c).unwrap_or(0)
    }
}
