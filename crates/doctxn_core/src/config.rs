//! Coordinator configuration.

use std::time::Duration;

/// Tuning for the per-document lock protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Base interval slept between acquisition attempts.
    ///
    /// Each sleep is jittered by a factor drawn from `[0.9, 1.1)`.
    pub backoff: Duration,

    /// Age beyond which a held lock is considered abandoned and may be broken.
    pub max_lock_age: Duration,

    /// Give up acquiring a lock after this long (`None` = wait forever).
    pub timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
            max_lock_age: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl LockConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base backoff interval.
    #[must_use]
    pub const fn backoff(mut self, interval: Duration) -> Self {
        self.backoff = interval;
        self
    }

    /// Sets the stale-lock threshold.
    #[must_use]
    pub const fn max_lock_age(mut self, age: Duration) -> Self {
        self.max_lock_age = age;
        self
    }

    /// Sets an acquisition deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Configuration for transactions created by a
/// [`TransactionManager`](crate::TransactionManager).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnConfig {
    /// Lock protocol settings.
    pub lock: LockConfig,
}

impl TxnConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the lock settings.
    #[must_use]
    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }
}

/// What the recovery sweeper does with a transaction found in `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Restore every participant from the backup.
    #[default]
    RollBack,
    /// Re-run the unit of work from the backup and finish the transaction.
    ///
    /// Falls back to rolling back when no unit of work is registered for the
    /// record's kind.
    RollForward,
}

/// Configuration for a [`RecoverySweeper`](crate::RecoverySweeper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// A non-terminal record is claimable once its timestamp is older than this.
    ///
    /// Keep this, plus the interval between sweeps, below
    /// [`LockConfig::max_lock_age`]: a `pending` transaction whose locks were
    /// broken first can no longer restore the participants it lost.
    pub stale_after: Duration,

    /// Handling of `pending` records.
    pub policy: ResumePolicy,

    /// Maximum number of records recovered by one [`sweep`](crate::RecoverySweeper::sweep).
    pub batch_limit: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
            policy: ResumePolicy::RollBack,
            batch_limit: 100,
        }
    }
}

impl SweeperConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the staleness threshold.
    #[must_use]
    pub const fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Sets the policy for pending records.
    #[must_use]
    pub const fn policy(mut self, policy: ResumePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }
}
