//! The document store interface and its reference implementations.
//!
//! The coordinator needs exactly three things from a store: a point read by
//! id, an unconditional replace, and an atomic find-and-modify. Everything
//! else in this crate is built on those.

mod collections;
mod error;
mod filter;
mod log;
mod memory;

pub use collections::Validator;
pub use error::{StoreError, StoreResult};
pub use filter::{Condition, Filter, Update};
pub use log::LogStore;
pub use memory::InMemoryStore;

use crate::types::Namespace;
use doctxn_codec::{Document, Value};

/// Which version of the document `find_one_and_update` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the update.
    Before,
    /// The document as written by the update.
    After,
}

/// A document store with linearizable single-document writes.
///
/// Implementations must make [`find_one_and_update`](Self::find_one_and_update)
/// atomic per document: no other write to the chosen document may interleave
/// between evaluating the filter and applying the update.
pub trait DocumentStore: Send + Sync {
    /// Reads the document with the given `_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn find_by_id(&self, namespace: &Namespace, id: &Value) -> StoreResult<Option<Document>>;

    /// Replaces the document with the given `_id`.
    ///
    /// If `doc` has no `_id` the target id is filled in. With `upsert`, a
    /// missing document is created. Returns whether a document was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImmutableId`] if `doc` carries a different `_id`,
    /// a validation error, or any store failure.
    fn replace(
        &self,
        namespace: &Namespace,
        id: &Value,
        doc: &Document,
        upsert: bool,
    ) -> StoreResult<bool>;

    /// Atomically updates the first document (in id order) matching `filter`.
    ///
    /// Returns `None` if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ImmutableId`] if the update touches `_id`, a
    /// validation error, or any store failure.
    fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>>;

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if the id exists,
    /// [`StoreError::MissingId`] if `doc` has no `_id`, or any store failure.
    fn insert(&self, namespace: &Namespace, doc: Document) -> StoreResult<()>;

    /// Returns every document matching `filter`, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn find(&self, namespace: &Namespace, filter: &Filter) -> StoreResult<Vec<Document>>;
}
