//! Units of work: the caller's mutation logic.

use crate::docref::DocumentRef;
use crate::error::WorkError;
use crate::types::DocumentKey;
use doctxn_codec::{Document, Value};
use std::fmt;
use std::sync::Arc;

/// A named mutation applied to the locked participants of a transaction.
///
/// Implementations must be deterministic in the payload and the snapshots:
/// a crashed transaction may be rolled forward by re-running `apply` on the
/// backed-up snapshots in another process.
pub trait UnitOfWork: Send + Sync {
    /// Name recorded in the transaction record, used to find the unit of
    /// work again during recovery.
    fn kind(&self) -> &str;

    /// Mutates the snapshots. Any error rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns whatever error the business logic reports.
    fn apply(&self, payload: &Value, docs: &mut Snapshots<'_>) -> Result<(), WorkError>;
}

/// Index-addressed access to the participants' snapshots.
///
/// Indexes follow registration order. Mutable access marks the participant
/// for write-back.
pub struct Snapshots<'a> {
    refs: &'a mut [DocumentRef],
}

impl<'a> Snapshots<'a> {
    pub(crate) fn new(refs: &'a mut [DocumentRef]) -> Self {
        Self { refs }
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if there are no participants.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Address of participant `index`.
    pub fn key(&self, index: usize) -> Option<&DocumentKey> {
        self.refs.get(index).map(DocumentRef::key)
    }

    /// Read-only snapshot of participant `index`.
    pub fn get(&self, index: usize) -> Option<&Document> {
        self.refs.get(index)?.snapshot()
    }

    /// Mutable snapshot of participant `index`; marks it dirty.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Document> {
        let doc_ref = self.refs.get_mut(index)?;
        doc_ref.mark_dirty();
        doc_ref.snapshot_mut()
    }
}

/// A unit of work backed by a closure. Built by [`work_fn`].
pub struct FnWork<F> {
    kind: String,
    f: F,
}

impl<F> fmt::Debug for FnWork<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWork").field("kind", &self.kind).finish()
    }
}

impl<F> UnitOfWork for FnWork<F>
where
    F: Fn(&Value, &mut Snapshots<'_>) -> Result<(), WorkError> + Send + Sync,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    fn apply(&self, payload: &Value, docs: &mut Snapshots<'_>) -> Result<(), WorkError> {
        (self.f)(payload, docs)
    }
}

/// Wraps a closure as a shareable unit of work.
///
/// # Example
///
/// ```rust
/// use doctxn_core::{work_fn, UnitOfWork};
///
/// let bump = work_fn("bump", |_payload, docs| {
///     let doc = docs.get_mut(0).ok_or("no participant")?;
///     let value = doc.get_integer("value")?;
///     doc.insert("value", value + 1);
///     Ok(())
/// });
/// assert_eq!(bump.kind(), "bump");
/// ```
pub fn work_fn<F>(kind: impl Into<String>, f: F) -> Arc<dyn UnitOfWork>
where
    F: Fn(&Value, &mut Snapshots<'_>) -> Result<(), WorkError> + Send + Sync + 'static,
{
    Arc::new(FnWork {
        kind: kind.into(),
        f,
    })
}
