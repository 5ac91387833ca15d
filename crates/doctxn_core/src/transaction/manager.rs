//! Transaction factory.

use super::Transaction;
use crate::config::{SweeperConfig, TxnConfig};
use crate::error::{CoreError, CoreResult};
use crate::record::TransactionRecord;
use crate::store::DocumentStore;
use crate::sweeper::{RecoverySweeper, WorkRegistry};
use crate::types::{DocumentKey, Namespace, TransactionId};
use crate::work::UnitOfWork;
use doctxn_codec::Value;
use std::fmt;
use std::sync::Arc;

/// Creates, loads and resumes transactions against one store.
///
/// Transaction records live in their own collection (`records`), which may
/// sit in any database of the store.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use doctxn_codec::Document;
/// use doctxn_core::{
///     work_fn, DocumentStore, InMemoryStore, Namespace, TransactionManager, TxnConfig,
/// };
///
/// let store = Arc::new(InMemoryStore::new());
/// let accounts = Namespace::new("bank", "accounts");
/// store.insert(&accounts, Document::with_id(1).with("value", 1)).unwrap();
///
/// let manager = TransactionManager::new(
///     store.clone(),
///     Namespace::new("bank", "transactions"),
///     TxnConfig::default(),
/// );
/// let bump = work_fn("bump", |_, docs| {
///     let doc = docs.get_mut(0).ok_or("no participant")?;
///     let value = doc.get_integer("value")?;
///     doc.insert("value", value + 1);
///     Ok(())
/// });
/// manager.run(bump, (), [accounts.key(1)]).unwrap();
/// ```
#[derive(Clone)]
pub struct TransactionManager {
    store: Arc<dyn DocumentStore>,
    records: Namespace,
    config: TxnConfig,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("records", &self.records)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager.
    pub fn new(store: Arc<dyn DocumentStore>, records: Namespace, config: TxnConfig) -> Self {
        Self {
            store,
            records,
            config,
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the namespace holding transaction records.
    pub fn records_namespace(&self) -> &Namespace {
        &self.records
    }

    /// Returns the configuration given to new transactions.
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Starts a transaction in `initial`. Register participants, then call
    /// [`Transaction::execute`].
    pub fn begin(&self, work: Arc<dyn UnitOfWork>, payload: impl Into<Value>) -> Transaction {
        Transaction::new(
            Arc::clone(&self.store),
            self.records.clone(),
            self.config.clone(),
            work,
            payload.into(),
        )
    }

    /// Begins, registers `participants` in order and executes.
    ///
    /// # Errors
    ///
    /// Returns any registration error, or the failure from
    /// [`Transaction::execute`].
    pub fn run(
        &self,
        work: Arc<dyn UnitOfWork>,
        payload: impl Into<Value>,
        participants: impl IntoIterator<Item = DocumentKey>,
    ) -> CoreResult<TransactionId> {
        let mut txn = self.begin(work, payload);
        for key in participants {
            txn.add_participant(key)?;
        }
        txn.execute()?;
        Ok(txn.id())
    }

    /// Reads a persisted record.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`CoreError::CorruptRecord`].
    pub fn load_record(&self, id: &TransactionId) -> CoreResult<Option<TransactionRecord>> {
        self.store
            .find_by_id(&self.records, &id.to_value())?
            .map(|doc| TransactionRecord::from_document(&doc))
            .transpose()
    }

    /// Rebuilds a transaction so that [`Transaction::execute`] continues it.
    ///
    /// A `pending` transaction first reclaims the locks its previous owner
    /// left, then is replayed from its backup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `work` is not of the
    /// record's kind.
    pub fn resume(
        &self,
        record: TransactionRecord,
        work: Arc<dyn UnitOfWork>,
    ) -> CoreResult<Transaction> {
        if work.kind() != record.kind() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is of kind `{}`, not `{}`",
                record.id(),
                record.kind(),
                work.kind()
            )));
        }
        Ok(self.rebuild(record, Some(work)))
    }

    /// Rebuilds a transaction that can only be rolled back or cancelled.
    pub fn resume_for_rollback(&self, record: TransactionRecord) -> Transaction {
        self.rebuild(record, None)
    }

    /// Creates a recovery sweeper over this manager's records.
    pub fn sweeper(&self, registry: WorkRegistry, config: SweeperConfig) -> RecoverySweeper {
        RecoverySweeper::new(self.clone(), registry, config)
    }

    fn rebuild(&self, record: TransactionRecord, work: Option<Arc<dyn UnitOfWork>>) -> Transaction {
        Transaction::from_record(
            Arc::clone(&self.store),
            self.records.clone(),
            self.config.clone(),
            record,
            work,
        )
    }
}
