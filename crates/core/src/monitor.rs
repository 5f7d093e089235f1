//! Periodic scan loop and liquidation decisions.
//!
//! One scan walks every loan in ascending id order, predicts the
//! platform's collateral check with the same fixed-point math, and
//! submits `liquidate` for anything under water. The prediction is
//! advisory: other liquidators, repayments, and admin price updates can
//! all land between the read and the write, so a rejected submission is
//! routine and the loop just moves on.
//!
//! Failure isolation is strict. A bad loan never stops the rest of the
//! scan, a bad scan never stops the next tick, and a tick that fires
//! while a scan is still running is skipped outright.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::BotConfig;
use crate::failures::FailureTracker;
use crate::math;
use lendbot_chain::{Ledger, LedgerError};

/// Monitor timing and escalation parameters.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between scan ticks
    pub poll_interval: Duration,
    /// Timeout applied to every ledger round trip
    pub call_timeout: Duration,
    /// Consecutive failures on one loan before escalating to a warning
    pub failure_alert_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            call_timeout: Duration::from_secs(10),
            failure_alert_threshold: 3,
        }
    }
}

impl From<&BotConfig> for MonitorConfig {
    fn from(config: &BotConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            call_timeout: config.call_timeout,
            failure_alert_threshold: config.failure_alert_threshold,
        }
    }
}

/// What happened to one loan during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanOutcome {
    /// Not active or not funded; no price read, no evaluation
    Ineligible,
    /// Id vanished between the count read and the detail read
    Missing,
    /// Detail or price fetch failed; re-examined next cycle
    FetchFailed,
    /// Collateral value at or above the threshold
    Healthy,
    /// Liquidation submitted and confirmed
    Liquidated,
    /// Liquidation submitted and refused or lost
    LiquidationFailed,
}

/// Aggregate counts for one completed scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub loan_count: u64,
    pub ineligible: u64,
    pub missing: u64,
    pub fetch_failed: u64,
    pub healthy: u64,
    pub liquidated: u64,
    pub liquidation_failed: u64,
}

impl ScanSummary {
    fn record(&mut self, outcome: LoanOutcome) {
        match outcome {
            LoanOutcome::Ineligible => self.ineligible += 1,
            LoanOutcome::Missing => self.missing += 1,
            LoanOutcome::FetchFailed => self.fetch_failed += 1,
            LoanOutcome::Healthy => self.healthy += 1,
            LoanOutcome::Liquidated => self.liquidated += 1,
            LoanOutcome::LiquidationFailed => self.liquidation_failed += 1,
        }
    }
}

/// RAII guard around the in-flight flag: at most one scan at a time,
/// released even if the scan task panics.
struct ScanGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then_some(Self { flag })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The liquidation monitor. Stateless between ticks apart from the
/// in-flight guard and the failure streak counters.
pub struct Monitor {
    ledger: Arc<dyn Ledger>,
    config: MonitorConfig,
    failures: FailureTracker,
    in_flight: AtomicBool,
}

impl Monitor {
    pub fn new(ledger: Arc<dyn Ledger>, config: MonitorConfig) -> Self {
        Self {
            ledger,
            config,
            failures: FailureTracker::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run until shutdown is signalled: schedule a tick every interval,
    /// then let any in-flight scan drain before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "Monitor started"
        );

        // Spawned ticks are tracked so shutdown can await the one that is
        // mid-scan; polling the in-flight flag instead would race a tick
        // that was spawned but has not acquired the guard yet.
        let mut scans: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    scans.retain(|handle| !handle.is_finished());
                    let monitor = Arc::clone(&self);
                    scans.push(tokio::spawn(async move { monitor.tick().await }));
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested, no further scans will be scheduled");
                    break;
                }
            }
        }

        for handle in scans {
            let _ = handle.await;
        }
        info!("Monitor stopped");
    }

    /// One timer tick: run a scan unless one is already in flight.
    pub async fn tick(&self) {
        let Some(_guard) = ScanGuard::acquire(&self.in_flight) else {
            debug!("Previous scan still in flight, skipping tick");
            return;
        };

        match self.scan().await {
            Ok(summary) => {
                info!(
                    loans = summary.loan_count,
                    healthy = summary.healthy,
                    liquidated = summary.liquidated,
                    failed = summary.liquidation_failed,
                    ineligible = summary.ineligible,
                    "Scan complete"
                );
            }
            Err(e) => {
                warn!(error = %e, "Scan aborted, will retry on next tick");
            }
        }
    }

    /// Walk all loans once. Only a failure to read the loan count aborts
    /// the cycle; everything below that is isolated per loan.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanSummary, LedgerError> {
        info!("Scanning for under-collateralized loans");

        let count = self.call(self.ledger.loan_count()).await?;

        let mut summary = ScanSummary {
            loan_count: count,
            ..ScanSummary::default()
        };

        // Sequential on purpose: one submission in flight at a time keeps
        // the single signing identity's nonce ordering trivial.
        for id in 1..=count {
            summary.record(self.evaluate(id).await);
        }

        Ok(summary)
    }

    /// Evaluate a single loan and liquidate it if under-collateralized.
    async fn evaluate(&self, id: u64) -> LoanOutcome {
        let loan = match self.call(self.ledger.get_loan(id)).await {
            Ok(loan) => loan,
            Err(LedgerError::NotFound(_)) => {
                debug!(id, "Loan gone since count read, skipping");
                return LoanOutcome::Missing;
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to fetch loan, skipping");
                return LoanOutcome::FetchFailed;
            }
        };

        if !loan.is_evaluable() {
            debug!(id, active = loan.active, funded = loan.funded, "Loan not eligible");
            self.failures.clear(id);
            return LoanOutcome::Ineligible;
        }

        // Fresh price per loan, same accessor the platform's own check uses.
        let price = match self.call(self.ledger.collateral_price()).await {
            Ok(price) => price,
            Err(e) => {
                warn!(id, error = %e, "Failed to read collateral price, skipping loan");
                return LoanOutcome::FetchFailed;
            }
        };

        if !math::is_undercollateralized(loan.collateral, loan.principal, price) {
            self.failures.clear(id);
            return LoanOutcome::Healthy;
        }

        let value = math::collateral_value(loan.collateral, price);
        let threshold = math::liquidation_threshold(loan.principal);
        info!(
            id,
            collateral_value = %value,
            threshold = %threshold,
            "Detected under-collateralized loan"
        );

        match self.call(self.ledger.liquidate(id)).await {
            Ok(receipt) => {
                info!(id, tx_hash = %receipt.tx_hash, "Liquidation succeeded");
                self.failures.clear(id);
                LoanOutcome::Liquidated
            }
            Err(LedgerError::ActionRejected(reason)) => {
                // The platform's check is authoritative; losing the race
                // to another liquidator or a repayment is expected.
                info!(id, reason = %reason, "Liquidation rejected by platform");
                self.note_failure(id);
                LoanOutcome::LiquidationFailed
            }
            Err(e) => {
                warn!(id, error = %e, "Liquidation failed");
                self.note_failure(id);
                LoanOutcome::LiquidationFailed
            }
        }
    }

    fn note_failure(&self, id: u64) {
        let streak = self.failures.record_failure(id);
        if streak >= self.config.failure_alert_threshold {
            warn!(
                id,
                consecutive_failures = streak,
                "Loan keeps failing liquidation, needs operator attention"
            );
        }
    }

    /// Consecutive liquidation failures recorded for a loan.
    pub fn failure_streak(&self, id: u64) -> u32 {
        self.failures.count(id)
    }

    /// Bound a ledger round trip; a hung call must not stall the loop
    /// past one tick's worth of patience.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Connectivity(format!(
                "call timed out after {:?}",
                self.config.call_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use lendbot_chain::{Loan, Receipt};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    const WAD: u64 = 1_000_000_000_000_000_000;

    fn wad(n: u64) -> U256 {
        U256::from(n) * U256::from(WAD)
    }

    fn loan(id: u64, principal: U256, collateral: U256, active: bool, funded: bool) -> Loan {
        Loan {
            id,
            borrower: Address::repeat_byte(0x42),
            lender: Address::repeat_byte(0x43),
            principal,
            collateral,
            interest: U256::from(50u64),
            start_time: 1_700_000_000,
            duration_secs: 604_800,
            active,
            funded,
            agreement_uri: "QmAgreement".to_string(),
            agreement_hash: B256::ZERO,
        }
    }

    #[derive(Default)]
    struct MockLedger {
        count: u64,
        loans: Mutex<HashMap<u64, Loan>>,
        price: Mutex<U256>,
        liquidations: Mutex<Vec<u64>>,
        fetch_failures: HashSet<u64>,
        reject_liquidations: bool,
        count_failure: bool,
        /// When set, `loan_count` blocks until a permit is added.
        count_gate: Option<Arc<Semaphore>>,
    }

    impl MockLedger {
        fn new(price: U256, loans: Vec<Loan>) -> Self {
            let count = loans.iter().map(|l| l.id).max().unwrap_or(0);
            Self {
                count,
                loans: Mutex::new(loans.into_iter().map(|l| (l.id, l)).collect()),
                price: Mutex::new(price),
                ..Self::default()
            }
        }

        fn set_price(&self, price: U256) {
            *self.price.lock().unwrap() = price;
        }

        fn liquidations(&self) -> Vec<u64> {
            self.liquidations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Ledger for MockLedger {
        async fn loan_count(&self) -> Result<u64, LedgerError> {
            if let Some(gate) = &self.count_gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.count_failure {
                return Err(LedgerError::Connectivity("node down".into()));
            }
            Ok(self.count)
        }

        async fn get_loan(&self, id: u64) -> Result<Loan, LedgerError> {
            if self.fetch_failures.contains(&id) {
                return Err(LedgerError::Connectivity("timeout".into()));
            }
            self.loans
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(LedgerError::NotFound(id))
        }

        async fn collateral_price(&self) -> Result<U256, LedgerError> {
            Ok(*self.price.lock().unwrap())
        }

        async fn liquidate(&self, id: u64) -> Result<Receipt, LedgerError> {
            self.liquidations.lock().unwrap().push(id);
            if self.reject_liquidations {
                return Err(LedgerError::ActionRejected("loan is healthy".into()));
            }
            // The platform closes the loan on success.
            if let Some(loan) = self.loans.lock().unwrap().get_mut(&id) {
                loan.active = false;
            }
            Ok(Receipt {
                tx_hash: B256::repeat_byte(0xab),
                block_number: 1,
                gas_used: 90_000,
            })
        }
    }

    fn monitor(ledger: MockLedger) -> Monitor {
        Monitor::new(Arc::new(ledger), MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_ineligible_loans_are_never_evaluated() {
        let ledger = MockLedger::new(
            wad(1), // crash price, everything eligible would liquidate
            vec![
                loan(1, wad(1000), wad(1), true, false),  // unfunded
                loan(2, wad(1000), wad(1), false, true),  // inactive
            ],
        );
        let monitor = monitor(ledger);

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.ineligible, 2);
        assert_eq!(summary.liquidated + summary.liquidation_failed, 0);
    }

    #[tokio::test]
    async fn test_healthy_loan_not_liquidated() {
        // value = 1 * 2000 = 2000, threshold = 1050
        let ledger = MockLedger::new(wad(2000), vec![loan(1, wad(1000), wad(1), true, true)]);
        let monitor = monitor(ledger);

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.liquidated, 0);
    }

    #[tokio::test]
    async fn test_price_drop_triggers_single_liquidation() {
        let ledger = Arc::new(MockLedger::new(
            wad(2000),
            vec![loan(1, wad(1000), wad(1), true, true)],
        ));
        let monitor = Monitor::new(ledger.clone(), MonitorConfig::default());

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.healthy, 1);

        // value = 1000 < threshold = 1050
        ledger.set_price(wad(1000));
        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.liquidated, 1);
        assert_eq!(ledger.liquidations(), vec![1]);

        // Loan is closed now; later cycles must not resubmit.
        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.ineligible, 1);
        assert_eq!(ledger.liquidations(), vec![1]);
    }

    #[tokio::test]
    async fn test_zero_price_liquidates_funded_loan() {
        // The admin oracle can pin the price at zero; collateral value 0
        // is below any positive threshold, so the platform would accept
        // the liquidation and the monitor must submit it.
        let ledger = Arc::new(MockLedger::new(
            U256::ZERO,
            vec![loan(1, wad(1000), wad(1), true, true)],
        ));
        let monitor = Monitor::new(ledger.clone(), MonitorConfig::default());

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.liquidated, 1);
        assert_eq!(summary.fetch_failed, 0);
        assert_eq!(ledger.liquidations(), vec![1]);
    }

    #[tokio::test]
    async fn test_boundary_price_is_healthy() {
        // value == threshold exactly: strictly-less-than only
        let ledger = MockLedger::new(wad(1050), vec![loan(1, wad(1000), wad(1), true, true)]);
        let monitor = monitor(ledger);

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.liquidated, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_stop_scan() {
        let mut ledger = MockLedger::new(
            wad(1),
            vec![
                loan(1, wad(1000), wad(1), true, true),
                loan(2, wad(1000), wad(1), true, true),
                loan(3, wad(1000), wad(1), true, true),
            ],
        );
        ledger.fetch_failures.insert(2);
        let ledger = Arc::new(ledger);
        let monitor = Monitor::new(ledger.clone(), MonitorConfig::default());

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.liquidated, 2);
        assert_eq!(ledger.liquidations(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_vanished_loan_is_skipped() {
        let mut ledger = MockLedger::new(wad(2000), vec![loan(2, wad(1000), wad(1), true, true)]);
        // Count says 2 but loan #1 is gone.
        ledger.count = 2;
        ledger.loans.lock().unwrap().remove(&1);
        let monitor = monitor(ledger);

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.healthy, 1);
    }

    #[tokio::test]
    async fn test_rejected_liquidation_does_not_stop_cycle() {
        let mut ledger = MockLedger::new(
            wad(1),
            vec![
                loan(1, wad(1000), wad(1), true, true),
                loan(2, wad(1000), wad(1), true, true),
            ],
        );
        ledger.reject_liquidations = true;
        let ledger = Arc::new(ledger);
        let monitor = Monitor::new(ledger.clone(), MonitorConfig::default());

        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.liquidation_failed, 2);
        assert_eq!(ledger.liquidations(), vec![1, 2]);

        // Next cycle runs and re-attempts: exactly one try per cycle.
        let summary = monitor.scan().await.unwrap();
        assert_eq!(summary.liquidation_failed, 2);
        assert_eq!(ledger.liquidations(), vec![1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn test_repeated_failures_build_a_streak() {
        let mut ledger = MockLedger::new(wad(1), vec![loan(1, wad(1000), wad(1), true, true)]);
        ledger.reject_liquidations = true;
        let monitor = monitor(ledger);

        for _ in 0..3 {
            monitor.scan().await.unwrap();
        }
        assert_eq!(monitor.failure_streak(1), 3);
    }

    #[tokio::test]
    async fn test_count_failure_aborts_cycle_only() {
        let mut ledger = MockLedger::new(wad(1), vec![loan(1, wad(1000), wad(1), true, true)]);
        ledger.count_failure = true;
        let ledger = Arc::new(ledger);
        let monitor = Monitor::new(ledger.clone(), MonitorConfig::default());

        assert!(monitor.scan().await.is_err());
        assert!(ledger.liquidations().is_empty());

        // tick() swallows the error; the guard must be released for the
        // next cycle.
        monitor.tick().await;
        monitor.tick().await;
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let gate = Arc::new(Semaphore::new(0));
        let mut ledger = MockLedger::new(wad(1), vec![loan(1, wad(1000), wad(1), true, true)]);
        ledger.count_gate = Some(gate.clone());
        let ledger = Arc::new(ledger);
        let monitor = Arc::new(Monitor::new(ledger.clone(), MonitorConfig::default()));

        // First tick blocks inside loan_count.
        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.tick().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second tick fires while the first scan is in flight: skipped.
        monitor.tick().await;
        assert!(ledger.liquidations().is_empty());

        gate.add_permits(1);
        first.await.unwrap();

        // The loan was unhealthy during both ticks but only the first
        // scan ran, so exactly one submission.
        assert_eq!(ledger.liquidations(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_connectivity() {
        struct HungLedger;

        #[async_trait]
        impl Ledger for HungLedger {
            async fn loan_count(&self) -> Result<u64, LedgerError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
            async fn get_loan(&self, id: u64) -> Result<Loan, LedgerError> {
                Err(LedgerError::NotFound(id))
            }
            async fn collateral_price(&self) -> Result<U256, LedgerError> {
                Ok(U256::ZERO)
            }
            async fn liquidate(&self, _id: u64) -> Result<Receipt, LedgerError> {
                Err(LedgerError::ActionRejected("unused".into()))
            }
        }

        let monitor = Monitor::new(Arc::new(HungLedger), MonitorConfig::default());
        let err = monitor.scan().await.unwrap_err();
        assert!(matches!(err, LedgerError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_scan() {
        let gate = Arc::new(Semaphore::new(0));
        let mut ledger = MockLedger::new(wad(1), vec![loan(1, wad(1000), wad(1), true, true)]);
        ledger.count_gate = Some(gate.clone());
        let ledger = Arc::new(ledger);

        let config = MonitorConfig {
            poll_interval: Duration::from_millis(10),
            ..MonitorConfig::default()
        };
        let monitor = Arc::new(Monitor::new(ledger.clone(), config));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(rx));

        // First tick fires immediately and blocks inside loan_count.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        // The scheduler loop has stopped but the scan is still blocked;
        // run() must not return out from under it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(ledger.liquidations().is_empty());

        gate.add_permits(10);
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not drain in-flight scan")
            .unwrap();

        // The blocked scan ran to completion during shutdown.
        assert_eq!(ledger.liquidations(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let ledger = Arc::new(MockLedger::new(wad(2000), vec![]));
        let monitor = Arc::new(Monitor::new(ledger, MonitorConfig::default()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(rx));
        tokio::time::sleep(Duration::from_secs(10)).await;

        tx.send(true).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
