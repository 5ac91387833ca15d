//! Stress tests for doctxn.
//!
//! Many threads run random transfers over a small set of accounts so that
//! most transactions contend for at least one lock.

use crate::fixtures::{accounts, seed_accounts};
use crate::work::transfer;
use doctxn_core::{CoreError, DocumentStore, TransactionManager};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions that applied.
    pub committed: usize,
    /// Transactions that failed and were rolled back.
    pub rolled_back: usize,
    /// Failures that left something behind, e.g. a failed rollback.
    pub errors: Vec<String>,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Transactions attempted.
    pub fn total(&self) -> usize {
        self.committed + self.rolled_back + self.errors.len()
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        let per_second = if self.duration.as_secs_f64() > 0.0 {
            self.total() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        };
        println!("\n=== {} ===", name);
        println!("Committed: {}", self.committed);
        println!("Rolled back: {}", self.rolled_back);
        println!("Errors: {}", self.errors.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transfers each thread attempts.
    pub transfers_per_thread: usize,
    /// Number of accounts; at least 2.
    pub accounts: usize,
    /// Starting balance of every account.
    pub initial_balance: i64,
    /// Largest single transfer.
    pub max_amount: i64,
    /// Seed for the per-thread random generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transfers_per_thread: 50,
            accounts: 5,
            initial_balance: 1_000,
            max_amount: 300,
            seed: 7,
        }
    }
}

/// Id of the `index`th stress account.
pub fn account_id(index: usize) -> String {
    format!("acct-{index:03}")
}

/// Seeds `config.accounts` accounts at `config.initial_balance`.
pub fn seed_stress_accounts(store: &dyn DocumentStore, config: &StressConfig) {
    let ids: Vec<String> = (0..config.accounts).map(account_id).collect();
    let balances: Vec<(&str, i64)> = ids
        .iter()
        .map(|id| (id.as_str(), config.initial_balance))
        .collect();
    seed_accounts(store, &balances);
}

/// Runs random transfers from `config.threads` threads.
///
/// Participants are always registered in ascending id order; the sign of
/// the amount picks the direction.
pub fn run_concurrent_transfers(
    manager: &TransactionManager,
    config: &StressConfig,
) -> StressTestResult {
    let committed = Arc::new(AtomicUsize::new(0));
    let rolled_back = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let manager = manager.clone();
            let config = config.clone();
            let committed = Arc::clone(&committed);
            let rolled_back = Arc::clone(&rolled_back);

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let mut errors = Vec::new();
                for _ in 0..config.transfers_per_thread {
                    let a = rng.gen_range(0..config.accounts);
                    let b = (a + rng.gen_range(1..config.accounts)) % config.accounts;
                    let (low, high) = (a.min(b), a.max(b));
                    let amount = rng.gen_range(1..=config.max_amount);
                    let amount = if rng.gen_bool(0.5) { amount } else { -amount };

                    let outcome = manager.run(
                        transfer(),
                        amount,
                        [
                            accounts().key(account_id(low)),
                            accounts().key(account_id(high)),
                        ],
                    );
                    match outcome {
                        Ok(_) => {
                            committed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(CoreError::RolledBack { .. }) => {
                            rolled_back.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                errors
            })
        })
        .collect();

    let mut errors = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(thread_errors) => errors.extend(thread_errors),
            Err(_) => errors.push("stress thread panicked".to_string()),
        }
    }

    StressTestResult {
        committed: committed.load(Ordering::Relaxed),
        rolled_back: rolled_back.load(Ordering::Relaxed),
        errors,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    #[test]
    fn test_concurrent_transfers_conserve_funds() {
        let config = StressConfig {
            threads: 4,
            transfers_per_thread: 25,
            ..StressConfig::default()
        };
        let store = TestStore::memory();
        seed_stress_accounts(&*store, &config);
        let manager = manager(store.shared());

        let result = run_concurrent_transfers(&manager, &config);
        result.print_summary("concurrent transfers");

        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.total(), 100);
        assert_eq!(
            total_balance(&*store),
            config.initial_balance * config.accounts as i64
        );
        assert_eq!(locked_documents(&*store, &accounts()), 0);
    }

    #[test]
    fn test_account_ids_sort_numerically() {
        assert!(account_id(2) < account_id(10));
    }
}
