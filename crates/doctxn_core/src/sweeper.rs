//! Recovery of transactions abandoned by crashed processes.
//!
//! A transaction whose record stays `initial` or `pending` for longer than
//! [`SweeperConfig::stale_after`] is presumed dead. A sweeper claims such a
//! record with one conditional update that also refreshes its timestamp.
//! The refreshed timestamp acts as a lease: competing sweepers skip the
//! record until it goes stale again.
//!
//! Claimed records are driven to a terminal state with the same primitives a
//! live transaction uses:
//!
//! | status    | kind registered | policy        | action          |
//! |-----------|-----------------|---------------|-----------------|
//! | `initial` | yes             | any           | execute         |
//! | `initial` | no              | any           | cancel          |
//! | `pending` | yes             | `RollForward` | execute (replay)|
//! | `pending` | any             | `RollBack`    | rollback        |
//! | `pending` | no              | `RollForward` | rollback        |
//!
//! The lease only works if `stale_after` comfortably exceeds the time a live
//! transaction spends between transitions.
//!
//! A resumed `pending` transaction first reclaims the locks its dead owner
//! left, each conditional on the exact marker recorded in the backup. If a
//! contender broke one of them in the meantime, that participant may already
//! carry newer committed work, so it is left untouched: the rest are
//! restored and the record is cancelled with [`CoreError::LocksLost`].

use crate::config::{ResumePolicy, SweeperConfig};
use crate::error::{CoreError, CoreResult};
use crate::record::{fields, TransactionRecord, TransactionStatus};
use crate::store::{Condition, Filter, ReturnDocument, Update};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::TransactionId;
use crate::work::UnitOfWork;
use doctxn_codec::{Timestamp, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Units of work the sweeper can re-run, by kind.
#[derive(Clone, Default)]
pub struct WorkRegistry {
    works: HashMap<String, Arc<dyn UnitOfWork>>,
}

impl fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.works.keys().collect();
        kinds.sort();
        f.debug_struct("WorkRegistry").field("kinds", &kinds).finish()
    }
}

impl WorkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit of work under its kind, replacing any previous one.
    pub fn register(&mut self, work: Arc<dyn UnitOfWork>) {
        self.works.insert(work.kind().to_string(), work);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, work: Arc<dyn UnitOfWork>) -> Self {
        self.register(work);
        self
    }

    /// Looks up a unit of work.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn UnitOfWork>> {
        self.works.get(kind).cloned()
    }
}

/// Outcome of recovering one record.
#[derive(Debug)]
pub enum Recovery {
    /// The transaction was finished.
    Applied {
        /// The transaction.
        id: TransactionId,
    },
    /// The transaction was cancelled or rolled back.
    Cancelled {
        /// The transaction.
        id: TransactionId,
        /// The failure that ended it, when it was re-executed and failed.
        cause: Option<CoreError>,
    },
    /// Recovery failed; the record stays non-terminal for a later sweep.
    Failed {
        /// The transaction.
        id: TransactionId,
        /// What went wrong.
        error: CoreError,
    },
}

impl Recovery {
    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        match self {
            Recovery::Applied { id }
            | Recovery::Cancelled { id, .. }
            | Recovery::Failed { id, .. } => *id,
        }
    }
}

/// Counts from one [`RecoverySweeper::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records claimed.
    pub claimed: usize,
    /// Claimed transactions that ended `applied`.
    pub applied: usize,
    /// Claimed transactions that ended `cancelled`.
    pub cancelled: usize,
    /// Claimed transactions left non-terminal.
    pub failed: usize,
}

/// Finds stale transactions and drives them to a terminal state.
#[derive(Debug, Clone)]
pub struct RecoverySweeper {
    manager: TransactionManager,
    registry: WorkRegistry,
    config: SweeperConfig,
}

impl RecoverySweeper {
    pub(crate) fn new(
        manager: TransactionManager,
        registry: WorkRegistry,
        config: SweeperConfig,
    ) -> Self {
        Self {
            manager,
            registry,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Claims the next stale non-terminal record, if any.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`CoreError::CorruptRecord`] if the claimed
    /// record cannot be decoded.
    pub fn claim_next(&self) -> CoreResult<Option<TransactionRecord>> {
        let now = Timestamp::now();
        let cutoff = now.saturating_sub(self.config.stale_after);
        let filter = Filter::and([
            Filter::or([
                Filter::field(
                    fields::STATUS,
                    Condition::Eq(TransactionStatus::Initial.into()),
                ),
                Filter::field(
                    fields::STATUS,
                    Condition::Eq(TransactionStatus::Pending.into()),
                ),
            ]),
            Filter::field(fields::TS, Condition::Lt(Value::Timestamp(cutoff))),
        ]);

        let claimed = self.manager.store().find_one_and_update(
            self.manager.records_namespace(),
            &filter,
            &Update::new().set(fields::TS, now),
            ReturnDocument::After,
        )?;
        let Some(doc) = claimed else {
            return Ok(None);
        };
        let record = TransactionRecord::from_document(&doc)?;
        debug!(id = %record.id(), status = %record.status(), "claimed stale transaction");
        Ok(Some(record))
    }

    /// Drives a claimed record to a terminal state.
    pub fn recover(&self, record: TransactionRecord) -> Recovery {
        let id = record.id();
        let status = record.status();
        let work = self.registry.get(record.kind());

        let (resumed, roll_forward) = match (status, work) {
            (TransactionStatus::Initial, Some(work)) => (self.manager.resume(record, work), true),
            (TransactionStatus::Pending, Some(work))
                if self.config.policy == ResumePolicy::RollForward =>
            {
                (self.manager.resume(record, work), true)
            }
            (TransactionStatus::Applied | TransactionStatus::Cancelled, _) => {
                return Recovery::Failed {
                    id,
                    error: CoreError::invalid_operation(format!(
                        "transaction {id} is already {status}"
                    )),
                };
            }
            (_, _) => {
                if status == TransactionStatus::Pending {
                    debug!(%id, kind = record.kind(), "rolling back pending transaction");
                } else {
                    warn!(%id, kind = record.kind(), "no unit of work registered, cancelling");
                }
                (Ok(self.manager.resume_for_rollback(record)), false)
            }
        };
        let mut txn = match resumed {
            Ok(txn) => txn,
            Err(error) => return Recovery::Failed { id, error },
        };

        let outcome = if roll_forward {
            txn.execute()
        } else {
            txn.cancel()
        };
        let recovery = Self::classify(&txn, outcome);
        match &recovery {
            Recovery::Applied { .. } => info!(%id, from = %status, "recovered transaction applied"),
            Recovery::Cancelled { .. } => {
                info!(%id, from = %status, "recovered transaction cancelled");
            }
            Recovery::Failed { error, .. } => {
                warn!(%id, from = %status, %error, "transaction recovery failed");
            }
        }
        recovery
    }

    /// Claims and recovers up to `batch_limit` records.
    ///
    /// # Errors
    ///
    /// Returns the first claim failure. Records recovered before it are
    /// already terminal.
    pub fn sweep(&self) -> CoreResult<SweepReport> {
        let mut report = SweepReport::default();
        while report.claimed < self.config.batch_limit {
            let Some(record) = self.claim_next()? else {
                break;
            };
            report.claimed += 1;
            match self.recover(record) {
                Recovery::Applied { .. } => report.applied += 1,
                Recovery::Cancelled { .. } => report.cancelled += 1,
                Recovery::Failed { .. } => report.failed += 1,
            }
        }
        if report.claimed > 0 {
            info!(?report, "sweep finished");
        }
        Ok(report)
    }

    fn classify(txn: &Transaction, outcome: CoreResult<()>) -> Recovery {
        let id = txn.id();
        match (txn.status(), outcome) {
            (TransactionStatus::Applied, _) => Recovery::Applied { id },
            (TransactionStatus::Cancelled, Ok(())) => Recovery::Cancelled { id, cause: None },
            (TransactionStatus::Cancelled, Err(e)) => Recovery::Cancelled { id, cause: Some(e) },
            (_, Err(error)) => Recovery::Failed { id, error },
            (status, Ok(())) => Recovery::Failed {
                id,
                error: CoreError::invalid_operation(format!(
                    "recovery stopped in state {status}"
                )),
            },
        }
    }
}
