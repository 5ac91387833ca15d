//! Fault injection for crash testing.
//!
//! [`FaultyStore`] wraps another store and fails every operation once it has
//! "crashed". A crash is either triggered directly or armed to fire after a
//! number of successful writes, which lets a test stop a transaction between
//! any two of its store writes. Healing the wrapper models a restarted
//! process looking at the same data.

use doctxn_codec::{Document, Value};
use doctxn_core::{
    DocumentStore, Filter, Namespace, ReturnDocument, StoreError, StoreResult, Update,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const UNLIMITED: usize = usize::MAX;

/// A store wrapper that simulates a process crash.
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    crashed: AtomicBool,
    /// Writes still allowed before the crash fires.
    remaining: AtomicUsize,
    writes: AtomicUsize,
}

impl FaultyStore {
    /// Wraps `inner` with no fault armed.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            crashed: AtomicBool::new(false),
            remaining: AtomicUsize::new(UNLIMITED),
            writes: AtomicUsize::new(0),
        }
    }

    /// Allows `writes` more writes, then crashes.
    pub fn crash_after(&self, writes: usize) {
        self.remaining.store(writes, Ordering::SeqCst);
    }

    /// Crashes now.
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }

    /// Restores normal operation and disarms any pending crash.
    pub fn heal(&self) {
        self.remaining.store(UNLIMITED, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Whether the store is crashed.
    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<dyn DocumentStore> {
        &self.inner
    }

    fn check_alive(&self) -> StoreResult<()> {
        if self.is_crashed() {
            Err(StoreError::unavailable("simulated crash"))
        } else {
            Ok(())
        }
    }

    fn admit_write(&self) -> StoreResult<()> {
        self.check_alive()?;
        let admitted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            });
        if admitted.is_err() {
            self.crash();
            return Err(StoreError::unavailable("simulated crash"));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DocumentStore for FaultyStore {
    fn find_by_id(&self, namespace: &Namespace, id: &Value) -> StoreResult<Option<Document>> {
        self.check_alive()?;
        self.inner.find_by_id(namespace, id)
    }

    fn replace(
        &self,
        namespace: &Namespace,
        id: &Value,
        doc: &Document,
        upsert: bool,
    ) -> StoreResult<bool> {
        self.admit_write()?;
        self.inner.replace(namespace, id, doc, upsert)
    }

    fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        self.admit_write()?;
        self.inner
            .find_one_and_update(namespace, filter, update, returning)
    }

    fn insert(&self, namespace: &Namespace, doc: Document) -> StoreResult<()> {
        self.admit_write()?;
        self.inner.insert(namespace, doc)
    }

    fn find(&self, namespace: &Namespace, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.check_alive()?;
        self.inner.find(namespace, filter)
    }
}
