//! Error types for doctxn core.

use crate::record::TransactionStatus;
use crate::store::StoreError;
use crate::types::{DocumentKey, TransactionId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error returned by a unit of work.
pub type WorkError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A participant document does not exist.
    NotFound,
    /// A lock could not be acquired before the deadline, was interrupted, or
    /// was lost to a stale-lock breaker.
    LockTimeout,
    /// The caller's unit of work reported an error.
    ApplicationFailure,
    /// The backing store rejected or failed an operation.
    StoreFailure,
    /// Misuse of the API or an inconsistent record.
    Internal,
}

/// Errors that can occur while coordinating a transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A participant document is missing.
    #[error("document {key} not found")]
    NotFound {
        /// The missing document.
        key: DocumentKey,
    },

    /// Lock acquisition exceeded its deadline.
    #[error("gave up waiting for the lock on {key} after {waited:?}")]
    LockTimeout {
        /// The contended document.
        key: DocumentKey,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// Lock acquisition was cancelled through a [`CancelHandle`](crate::CancelHandle).
    #[error("lock acquisition on {key} was interrupted")]
    LockInterrupted {
        /// The contended document.
        key: DocumentKey,
    },

    /// The unit of work failed.
    #[error("unit of work `{kind}` failed: {source}")]
    Application {
        /// Kind of the failing unit of work.
        kind: String,
        /// The error it returned.
        #[source]
        source: WorkError,
    },

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transaction failed and every participant was restored.
    #[error("transaction {id} rolled back: {cause}")]
    RolledBack {
        /// The transaction.
        id: TransactionId,
        /// The failure that triggered the rollback.
        cause: Arc<CoreError>,
    },

    /// The transaction failed and the rollback failed too.
    ///
    /// The record stays `pending` with its locks held until recovered.
    #[error("transaction {id} failed ({cause}) and rollback failed: {rollback}")]
    RollbackFailed {
        /// The transaction.
        id: TransactionId,
        /// The original failure.
        cause: Arc<CoreError>,
        /// The failure encountered while rolling back.
        rollback: Arc<CoreError>,
    },

    /// A resumed transaction found locks it inherited broken by other
    /// transactions.
    ///
    /// Those participants were left as found; the others were restored and
    /// the record is `cancelled`.
    #[error("transaction {id} lost the locks on {} participant(s); they were left untouched", keys.len())]
    LocksLost {
        /// The transaction.
        id: TransactionId,
        /// Participants whose lock had been broken.
        keys: Vec<DocumentKey>,
    },

    /// The transaction was cancelled before it could apply.
    #[error("transaction {id} was cancelled")]
    Cancelled {
        /// The transaction.
        id: TransactionId,
    },

    /// The persisted record moved on without this process.
    #[error("transaction {id} is no longer {expected}; another process took it over")]
    RecordConflict {
        /// The transaction.
        id: TransactionId,
        /// The status this process expected the record to have.
        expected: TransactionStatus,
    },

    /// A persisted transaction record could not be decoded.
    #[error("corrupt transaction record: {message}")]
    CorruptRecord {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(key: DocumentKey) -> Self {
        Self::NotFound { key }
    }

    /// Creates an application failure.
    pub fn application(kind: impl Into<String>, source: WorkError) -> Self {
        Self::Application {
            kind: kind.into(),
            source,
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Classifies the error.
    ///
    /// Wrapped failures report the kind of the failure that caused them.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LockTimeout { .. } | Self::LockInterrupted { .. } | Self::LocksLost { .. } => {
                ErrorKind::LockTimeout
            }
            Self::Application { .. } => ErrorKind::ApplicationFailure,
            Self::Store(_) => ErrorKind::StoreFailure,
            Self::RolledBack { cause, .. } | Self::RollbackFailed { cause, .. } => cause.kind(),
            Self::Cancelled { .. }
            | Self::RecordConflict { .. }
            | Self::CorruptRecord { .. }
            | Self::InvalidOperation { .. } => ErrorKind::Internal,
        }
    }

    /// Follows rollback wrappers down to the originating failure.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::RolledBack { cause, .. } | Self::RollbackFailed { cause, .. } => {
                cause.root_cause()
            }
            other => other,
        }
    }

    /// Returns true if every participant was restored after the failure.
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack { .. })
    }
}
