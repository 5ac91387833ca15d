//! The transaction coordinator.
//!
//! A [`Transaction`] drives its record through
//!
//! ```text
//! Initial ──lock all, persist backup──► Pending ──apply, write back──► Applied
//!    │                                     │
//!    └──── abort (nothing mutated) ────────┴──── rollback ───────────► Cancelled
//! ```
//!
//! [`Transaction::execute`] dispatches on the current status until a terminal
//! status is reached, so a transaction rebuilt from a persisted record resumes
//! exactly where the record says it stopped.

mod manager;

pub use manager::TransactionManager;

use crate::config::TxnConfig;
use crate::docref::DocumentRef;
use crate::error::{CoreError, CoreResult};
use crate::lock::{self, CancelHandle, LOCK_FIELD};
use crate::record::{fields, TransactionRecord, TransactionStatus};
use crate::store::{Condition, DocumentStore, Filter, ReturnDocument, Update};
use crate::types::{DocumentKey, Namespace, TransactionId};
use crate::work::{Snapshots, UnitOfWork};
use doctxn_codec::{Timestamp, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A multi-document transaction.
pub struct Transaction {
    store: Arc<dyn DocumentStore>,
    records: Namespace,
    config: TxnConfig,
    record: TransactionRecord,
    participants: Vec<DocumentRef>,
    work: Option<Arc<dyn UnitOfWork>>,
    failure: Option<Arc<CoreError>>,
    cancel: CancelHandle,
    persisted: bool,
    replay_from_backup: bool,
    inherited_locks: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.record.id())
            .field("status", &self.record.status())
            .field("kind", &self.record.kind())
            .field("participants", &self.record.participants().len())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        records: Namespace,
        config: TxnConfig,
        work: Arc<dyn UnitOfWork>,
        payload: Value,
    ) -> Self {
        let record = TransactionRecord::new(work.kind(), payload);
        Self {
            store,
            records,
            config,
            record,
            participants: Vec::new(),
            work: Some(work),
            failure: None,
            cancel: CancelHandle::new(),
            persisted: false,
            replay_from_backup: false,
            inherited_locks: false,
        }
    }

    /// Rebuilds a transaction from its persisted record.
    ///
    /// A `pending` record inherits the locks its original owner left on the
    /// participants. They are reclaimed before anything is written.
    pub(crate) fn from_record(
        store: Arc<dyn DocumentStore>,
        records: Namespace,
        config: TxnConfig,
        record: TransactionRecord,
        work: Option<Arc<dyn UnitOfWork>>,
    ) -> Self {
        let pending = record.status() == TransactionStatus::Pending;
        let participants = record
            .participants()
            .iter()
            .cloned()
            .map(DocumentRef::new)
            .collect();
        Self {
            store,
            records,
            config,
            record,
            participants,
            work,
            failure: None,
            cancel: CancelHandle::new(),
            persisted: true,
            replay_from_backup: pending,
            inherited_locks: pending,
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.record.id()
    }

    /// Returns the current status.
    pub fn status(&self) -> TransactionStatus {
        self.record.status()
    }

    /// Returns the in-memory record.
    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    /// Returns the participants in registration order.
    pub fn participants(&self) -> &[DocumentRef] {
        &self.participants
    }

    /// Returns a handle that interrupts lock acquisition from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Returns the failure that ended the transaction, if any.
    pub fn failure(&self) -> Option<&CoreError> {
        self.failure.as_deref()
    }

    /// Registers a participant, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless the transaction is
    /// `initial` and not yet enqueued, or if the document is already a
    /// participant (it would wait on its own lock).
    pub fn add_participant(&mut self, key: DocumentKey) -> CoreResult<usize> {
        if self.status() != TransactionStatus::Initial || self.persisted {
            return Err(CoreError::invalid_operation(format!(
                "cannot add participants to {} transaction {}",
                self.status(),
                self.id()
            )));
        }
        if self.record.participants().contains(&key) {
            return Err(CoreError::invalid_operation(format!(
                "{key} is already a participant of {}",
                self.id()
            )));
        }
        self.record.push_participant(key.clone());
        self.participants.push(DocumentRef::new(key));
        Ok(self.participants.len() - 1)
    }

    /// Persists the `initial` record for deferred execution.
    ///
    /// A [`RecoverySweeper`](crate::RecoverySweeper) picks the record up once
    /// it is stale.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not
    /// `initial` or was already enqueued, or a store error.
    pub fn enqueue(&mut self) -> CoreResult<()> {
        if self.status() != TransactionStatus::Initial || self.persisted {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} cannot be enqueued in state {}",
                self.id(),
                self.status()
            )));
        }
        self.save_record(TransactionStatus::Initial)
    }

    /// Runs the transaction to a terminal state.
    ///
    /// Calling it again after a terminal state performs no effects: an applied
    /// transaction returns `Ok(())`, a cancelled one returns the same failure
    /// as the first time.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RolledBack`] wrapping the cause when the transaction
    ///   ended `cancelled` with every participant restored
    /// - [`CoreError::RollbackFailed`] when restoring failed; the record stays
    ///   `pending` and the locks stay held
    /// - [`CoreError::LocksLost`] when a resumed `pending` transaction found
    ///   some inherited locks broken; it ended `cancelled` without touching
    ///   those participants
    /// - [`CoreError::Cancelled`] when it was cancelled via [`cancel`](Self::cancel)
    /// - [`CoreError::RecordConflict`] when another process took the record over
    /// - [`CoreError::InvalidOperation`] when the transaction was loaded
    ///   without a unit of work
    pub fn execute(&mut self) -> CoreResult<()> {
        if self.work.is_none() && !self.status().is_terminal() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} was loaded for rollback only",
                self.id()
            )));
        }
        loop {
            match self.status() {
                TransactionStatus::Initial => self.prepare()?,
                TransactionStatus::Pending => self.commit()?,
                TransactionStatus::Applied => return Ok(()),
                TransactionStatus::Cancelled => return Err(self.terminal_failure()),
            }
        }
    }

    /// Undoes the transaction.
    ///
    /// No-op in `initial` and in terminal states. In `pending`, every
    /// participant is restored from the backup and written back, the record
    /// becomes `cancelled`, then the locks are released.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LocksLost`] when a resumed transaction could not
    /// reclaim every lock; the record is `cancelled` but those participants
    /// were not restored. Otherwise returns the first failure and the record
    /// stays `pending`.
    pub fn rollback(&mut self) -> CoreResult<()> {
        match self.status() {
            TransactionStatus::Pending => {
                self.reclaim_inherited()?;
                self.rollback_pending()
            }
            _ => Ok(()),
        }
    }

    /// Like [`rollback`](Self::rollback), but an `initial` transaction is also
    /// durably marked `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns a store failure, or any rollback failure.
    pub fn cancel(&mut self) -> CoreResult<()> {
        match self.status() {
            TransactionStatus::Initial => {
                self.release_locks();
                self.save_record(TransactionStatus::Cancelled)
            }
            TransactionStatus::Pending => {
                self.reclaim_inherited()?;
                self.rollback_pending()
            }
            TransactionStatus::Applied | TransactionStatus::Cancelled => Ok(()),
        }
    }

    /// INITIAL handler: lock everything, back it up, go `pending`.
    fn prepare(&mut self) -> CoreResult<()> {
        if let Err(cause) = self.lock_all() {
            return Err(self.abort(cause));
        }

        let backup = self
            .participants
            .iter()
            .map(|p| p.snapshot().cloned())
            .collect::<Option<Vec<_>>>();
        let Some(backup) = backup else {
            let cause = CoreError::invalid_operation("a locked participant has no snapshot");
            return Err(self.abort(cause));
        };
        self.record.set_backup(backup);

        if let Err(cause) = self.save_record(TransactionStatus::Pending) {
            self.record.clear_backup();
            if matches!(cause, CoreError::RecordConflict { .. }) {
                self.release_locks();
                return Err(cause);
            }
            return Err(self.abort(cause));
        }
        Ok(())
    }

    /// PENDING handler: apply, write back, go `applied`, unlock.
    fn commit(&mut self) -> CoreResult<()> {
        let Some(work) = self.work.clone() else {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} has no unit of work to apply",
                self.id()
            )));
        };
        self.reclaim_inherited()?;

        let outcome = self
            .apply_and_write_back(work.as_ref())
            .and_then(|()| self.save_record(TransactionStatus::Applied));
        match outcome {
            Ok(()) => {
                self.release_locks();
                Ok(())
            }
            Err(cause @ CoreError::RecordConflict { .. }) => Err(cause),
            Err(cause) => Err(self.fail_pending(cause)),
        }
    }

    fn apply_and_write_back(&mut self, work: &dyn UnitOfWork) -> CoreResult<()> {
        if self.replay_from_backup {
            self.seed_from_backup()?;
            self.replay_from_backup = false;
        }

        let mut docs = Snapshots::new(&mut self.participants);
        work.apply(self.record.payload(), &mut docs)
            .map_err(|source| CoreError::application(work.kind(), source))?;

        for participant in &mut self.participants {
            participant.persist(self.store.as_ref())?;
        }
        Ok(())
    }

    fn check_backup(&self) -> CoreResult<()> {
        let backup = self.record.backup();
        if backup.len() != self.participants.len() {
            return Err(CoreError::corrupt_record(format!(
                "transaction {} has {} backup snapshots for {} participants",
                self.record.id(),
                backup.len(),
                self.participants.len()
            )));
        }
        Ok(())
    }

    /// Resets every held participant to its locked-read state and marks it
    /// dirty.
    fn seed_from_backup(&mut self) -> CoreResult<()> {
        self.check_backup()?;
        let backup = self.record.backup();
        for (participant, snapshot) in self.participants.iter_mut().zip(backup) {
            if !participant.holds_lock() {
                continue;
            }
            let mut restored = snapshot.clone();
            // Keep the marker the lock currently carries.
            if let Some(marker) = participant.snapshot().and_then(|d| d.get(LOCK_FIELD)) {
                restored.insert(LOCK_FIELD, marker.clone());
            }
            participant.replace_snapshot(restored);
        }
        Ok(())
    }

    /// Re-takes the locks a resumed `pending` transaction inherited.
    ///
    /// Each lock must still carry the marker recorded in the backup. A lock
    /// that was broken since may have let another transaction commit over
    /// that participant, so it is never overwritten: the participants still
    /// held are restored, the record is cancelled and
    /// [`CoreError::LocksLost`] is returned.
    fn reclaim_inherited(&mut self) -> CoreResult<()> {
        if !self.inherited_locks {
            return Ok(());
        }
        self.check_backup()?;
        let backup = self.record.backup();

        let mut lost = Vec::new();
        for (participant, snapshot) in self.participants.iter_mut().zip(backup) {
            if participant.holds_lock() {
                continue;
            }
            let reclaimed = match snapshot.get(LOCK_FIELD) {
                Some(Value::Timestamp(since)) => {
                    lock::reclaim(self.store.as_ref(), participant, *since)?
                }
                _ => false,
            };
            if !reclaimed {
                lost.push(participant.key().clone());
            }
        }
        self.inherited_locks = false;
        if lost.is_empty() {
            return Ok(());
        }

        warn!(
            id = %self.id(),
            lost = lost.len(),
            "inherited locks were broken, cancelling without touching those participants"
        );
        let cause = Arc::new(CoreError::LocksLost {
            id: self.id(),
            keys: lost.clone(),
        });
        match self.rollback_pending() {
            Ok(()) => {
                self.failure = Some(cause);
                Err(CoreError::LocksLost {
                    id: self.id(),
                    keys: lost,
                })
            }
            Err(e) => Err(CoreError::RollbackFailed {
                id: self.id(),
                cause,
                rollback: Arc::new(e),
            }),
        }
    }

    fn rollback_pending(&mut self) -> CoreResult<()> {
        self.seed_from_backup()?;
        for participant in &mut self.participants {
            participant.persist(self.store.as_ref())?;
        }
        self.save_record(TransactionStatus::Cancelled)?;
        self.release_locks();
        debug!(id = %self.id(), "transaction rolled back");
        Ok(())
    }

    /// Ends an `initial` transaction that failed before mutating anything.
    fn abort(&mut self, cause: CoreError) -> CoreError {
        let cause = Arc::new(cause);
        let saved = self.save_record(TransactionStatus::Cancelled);
        self.release_locks();
        match saved {
            Ok(()) => {
                debug!(id = %self.id(), %cause, "transaction aborted");
                self.failure = Some(Arc::clone(&cause));
                CoreError::RolledBack {
                    id: self.id(),
                    cause,
                }
            }
            Err(e) => CoreError::RollbackFailed {
                id: self.id(),
                cause,
                rollback: Arc::new(e),
            },
        }
    }

    /// Rolls back after a failure in `pending`.
    fn fail_pending(&mut self, cause: CoreError) -> CoreError {
        let cause = Arc::new(cause);
        match self.rollback_pending() {
            Ok(()) => {
                self.failure = Some(Arc::clone(&cause));
                CoreError::RolledBack {
                    id: self.id(),
                    cause,
                }
            }
            Err(e) => {
                warn!(id = %self.id(), %cause, error = %e, "rollback failed, transaction left pending");
                CoreError::RollbackFailed {
                    id: self.id(),
                    cause,
                    rollback: Arc::new(e),
                }
            }
        }
    }

    fn terminal_failure(&self) -> CoreError {
        let Some(cause) = &self.failure else {
            return CoreError::Cancelled { id: self.id() };
        };
        if let CoreError::LocksLost { id, keys } = cause.as_ref() {
            return CoreError::LocksLost {
                id: *id,
                keys: keys.clone(),
            };
        }
        CoreError::RolledBack {
            id: self.id(),
            cause: Arc::clone(cause),
        }
    }

    fn lock_all(&mut self) -> CoreResult<()> {
        for participant in &mut self.participants {
            lock::acquire(
                self.store.as_ref(),
                participant,
                &self.config.lock,
                &self.cancel,
            )?;
        }
        Ok(())
    }

    /// Releases every lock this transaction holds.
    ///
    /// Only called once the outcome is durable, so failures are logged: a
    /// leftover marker ages into a stale lock and gets broken.
    fn release_locks(&mut self) {
        for participant in &mut self.participants {
            if !participant.holds_lock() {
                continue;
            }
            if let Err(e) = lock::release(self.store.as_ref(), participant) {
                warn!(key = %participant.key(), error = %e, "failed to release lock");
            }
        }
    }

    /// Durably moves the record to `status`.
    ///
    /// The first write inserts the record. Later writes are conditional on
    /// the status this process last saw, so a record taken over by a sweeper
    /// cannot be advanced by its former owner. The in-memory record is left
    /// unchanged on failure.
    fn save_record(&mut self, status: TransactionStatus) -> CoreResult<()> {
        let previous = (self.record.status(), self.record.ts());
        let same_initial =
            previous.0 == TransactionStatus::Initial && status == TransactionStatus::Initial;
        if !same_initial && !previous.0.can_transition_to(status) {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} cannot move from {} to {status}",
                self.id(),
                previous.0
            )));
        }

        self.record.set_status(status, Timestamp::now());
        let result = if self.persisted {
            self.advance_persisted(previous.0)
        } else {
            self.store
                .insert(&self.records, self.record.to_document())
                .map_err(CoreError::from)
        };

        match result {
            Ok(()) => {
                self.persisted = true;
                debug!(id = %self.id(), from = %previous.0, to = %status, "record saved");
                Ok(())
            }
            Err(e) => {
                self.record.set_status(previous.0, previous.1);
                Err(e)
            }
        }
    }

    fn advance_persisted(&self, expected: TransactionStatus) -> CoreResult<()> {
        let mut update = Update::new()
            .set(fields::STATUS, self.record.status())
            .set(fields::TS, self.record.ts());
        if !self.record.backup().is_empty() {
            update = update.set(
                fields::BACKUP,
                self.record
                    .backup()
                    .iter()
                    .cloned()
                    .map(Value::from)
                    .collect::<Vec<_>>(),
            );
        }
        let filter = Filter::and([
            Filter::by_id(self.id().to_value()),
            Filter::field(fields::STATUS, Condition::Eq(expected.into())),
        ]);

        match self
            .store
            .find_one_and_update(&self.records, &filter, &update, ReturnDocument::After)?
        {
            Some(_) => Ok(()),
            None => Err(CoreError::RecordConflict {
                id: self.id(),
                expected,
            }),
        }
    }
}
