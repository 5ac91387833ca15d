//! Crash recovery testing for doctxn.
//!
//! Simulates a process dying between any two store writes of a transfer and
//! verifies that a recovery sweep leaves the accounts consistent.
//!
//! ## Test Strategy
//!
//! A two-account transfer issues [`TRANSFER_WRITES`] writes: two lock
//! acquisitions, the pending record, two write-backs, the applied record and
//! two lock releases. [`CrashHarness::run`] lets the first `n` of them
//! through, then fails every store call, so the in-process rollback cannot
//! run either. The store is then healed and swept as a restarted process
//! would.
//!
//! ## Usage
//!
//! ```rust
//! use doctxn_core::ResumePolicy;
//! use doctxn_testkit::crash::{CrashHarness, TRANSFER_WRITES};
//!
//! let harness = CrashHarness::new(ResumePolicy::RollBack);
//! for n in 0..=TRANSFER_WRITES {
//!     harness.run(n).check().unwrap();
//! }
//! ```

use crate::faulty::FaultyStore;
use crate::fixtures::{accounts, balance, locked_documents, manager, seed_accounts};
use crate::work::{registry, transfer};
use doctxn_core::{
    DocumentStore, InMemoryStore, ResumePolicy, SweepReport, SweeperConfig, TransactionStatus,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Store writes issued by an uninterrupted two-account transfer.
pub const TRANSFER_WRITES: usize = 8;

/// Crashes a transfer and recovers it.
#[derive(Debug, Clone)]
pub struct CrashHarness {
    policy: ResumePolicy,
    initial: (i64, i64),
    amount: i64,
}

/// What a crashed and recovered transfer left behind.
#[derive(Debug, Clone)]
pub struct CrashOutcome {
    /// Writes allowed before the crash.
    pub crash_after: usize,
    /// Whether the interrupted `execute` reported success.
    pub reported_success: bool,
    /// Final record status; `None` if the record was never written.
    pub record: Option<TransactionStatus>,
    /// Final balances of the two accounts.
    pub balances: (i64, i64),
    /// Balances before the transfer.
    pub before: (i64, i64),
    /// Balances had the transfer applied.
    pub after: (i64, i64),
    /// Accounts still carrying a lock.
    pub leftover_locks: usize,
    /// What the recovery sweep did.
    pub report: SweepReport,
}

impl CrashHarness {
    /// A harness that sweeps with `policy`.
    pub fn new(policy: ResumePolicy) -> Self {
        Self {
            policy,
            initial: (100, 50),
            amount: 10,
        }
    }

    /// Crashes after `crash_after` writes, heals and sweeps.
    pub fn run(&self, crash_after: usize) -> CrashOutcome {
        let base: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
        seed_accounts(
            base.as_ref(),
            &[("a", self.initial.0), ("b", self.initial.1)],
        );
        let faulty = Arc::new(FaultyStore::new(Arc::clone(&base)));
        let manager = manager(faulty.clone());

        faulty.crash_after(crash_after);
        let mut txn = manager.begin(transfer(), self.amount);
        txn.add_participant(accounts().key("a"))
            .expect("Failed to add participant");
        txn.add_participant(accounts().key("b"))
            .expect("Failed to add participant");
        let id = txn.id();
        let reported_success = txn.execute().is_ok();
        drop(txn);

        faulty.heal();
        // Records written in this millisecond are not yet older than a zero staleness.
        thread::sleep(Duration::from_millis(2));
        let sweeper = manager.sweeper(
            registry(),
            SweeperConfig::new()
                .stale_after(Duration::ZERO)
                .policy(self.policy),
        );
        let report = sweeper.sweep().expect("Recovery sweep failed");

        let record = manager
            .load_record(&id)
            .expect("Failed to load record")
            .map(|r| r.status());
        CrashOutcome {
            crash_after,
            reported_success,
            record,
            balances: (balance(base.as_ref(), "a"), balance(base.as_ref(), "b")),
            before: self.initial,
            after: (self.initial.0 - self.amount, self.initial.1 + self.amount),
            leftover_locks: locked_documents(base.as_ref(), &accounts()),
            report,
        }
    }
}

impl CrashOutcome {
    /// Checks atomicity and cleanup of the recovered transfer.
    ///
    /// # Errors
    ///
    /// Describes the first violated expectation.
    pub fn check(&self) -> Result<(), String> {
        let n = self.crash_after;
        match self.record {
            Some(TransactionStatus::Initial | TransactionStatus::Pending) => {
                return Err(format!("crash after {n}: record left {:?}", self.record));
            }
            Some(TransactionStatus::Applied) if self.balances != self.after => {
                return Err(format!(
                    "crash after {n}: applied but balances are {:?}",
                    self.balances
                ));
            }
            Some(TransactionStatus::Cancelled) | None if self.balances != self.before => {
                return Err(format!(
                    "crash after {n}: not applied but balances are {:?}",
                    self.balances
                ));
            }
            _ => {}
        }
        if self.reported_success && self.record != Some(TransactionStatus::Applied) {
            return Err(format!("crash after {n}: success reported but not applied"));
        }
        // Locks outlive the crash only when nothing recorded them; max_lock_age frees them.
        let recorded = self.record.is_some() && self.record != Some(TransactionStatus::Applied);
        if (recorded || self.report.claimed > 0) && self.leftover_locks != 0 {
            return Err(format!(
                "crash after {n}: {} locks left after recovery",
                self.leftover_locks
            ));
        }
        Ok(())
    }
}
