//! Document store errors.

use crate::types::Namespace;
use doctxn_codec::{CodecError, Value};
use doctxn_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`DocumentStore`](super::DocumentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection's validator rejected a write.
    #[error("document validation failed in {namespace}: {message}")]
    Validation {
        /// The collection.
        namespace: Namespace,
        /// The validator's message.
        message: String,
    },

    /// An insert collided with an existing `_id`.
    #[error("duplicate key {id:?} in {namespace}")]
    DuplicateKey {
        /// The collection.
        namespace: Namespace,
        /// The colliding id.
        id: Value,
    },

    /// A document was written without an `_id`.
    #[error("document written to {namespace} has no _id")]
    MissingId {
        /// The collection.
        namespace: Namespace,
    },

    /// A write tried to change a document's `_id`.
    #[error("cannot change _id of {id:?} in {namespace}")]
    ImmutableId {
        /// The collection.
        namespace: Namespace,
        /// The document's id.
        id: Value,
    },

    /// The store cannot serve requests.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the condition.
        message: String,
    },

    /// The durable log is damaged beyond a torn tail.
    #[error("document log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// Another process owns the log file.
    #[error("document log {} is locked by another process", path.display())]
    LogLocked {
        /// Path of the log.
        path: PathBuf,
    },

    /// I/O error outside the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
