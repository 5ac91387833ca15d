//! Lazily loaded handles to participant documents.

use crate::error::{CoreError, CoreResult};
use crate::store::DocumentStore;
use crate::types::DocumentKey;
use doctxn_codec::Document;

/// A transaction's view of one participant document.
///
/// The cached snapshot is loaded once and is the only copy the unit of work
/// mutates. It is written back by [`persist`](Self::persist) only when dirty.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    key: DocumentKey,
    snapshot: Option<Document>,
    dirty: bool,
    lock_held: bool,
}

impl DocumentRef {
    /// Creates a handle with nothing loaded.
    pub fn new(key: DocumentKey) -> Self {
        Self {
            key,
            snapshot: None,
            dirty: false,
            lock_held: false,
        }
    }

    /// Returns the document's address.
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Returns the cached snapshot, reading it from the store on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the document does not exist, or a
    /// store error.
    pub fn load(&mut self, store: &dyn DocumentStore) -> CoreResult<&Document> {
        if self.snapshot.is_none() {
            let doc = store
                .find_by_id(self.key.namespace(), self.key.id())?
                .ok_or_else(|| CoreError::not_found(self.key.clone()))?;
            self.snapshot = Some(doc);
        }
        self.snapshot
            .as_ref()
            .ok_or_else(|| CoreError::not_found(self.key.clone()))
    }

    /// Returns the cached snapshot, if loaded.
    pub fn snapshot(&self) -> Option<&Document> {
        self.snapshot.as_ref()
    }

    /// Returns the cached snapshot for mutation.
    ///
    /// This does not mark the handle dirty.
    pub fn snapshot_mut(&mut self) -> Option<&mut Document> {
        self.snapshot.as_mut()
    }

    /// Caches a freshly read version without marking it dirty.
    pub fn set_snapshot(&mut self, doc: Document) {
        self.snapshot = Some(doc);
    }

    /// Forces the cache to a prior version and marks it dirty.
    pub fn replace_snapshot(&mut self, doc: Document) {
        self.snapshot = Some(doc);
        self.dirty = true;
    }

    /// Flags the snapshot for write-back.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns true if the snapshot needs writing back.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true while this transaction holds the document's lock.
    pub fn holds_lock(&self) -> bool {
        self.lock_held
    }

    pub(crate) fn set_lock_held(&mut self, held: bool) {
        self.lock_held = held;
    }

    /// Writes the snapshot back if dirty, then clears the dirty flag.
    ///
    /// The replace is unconditional: exclusivity comes from the lock, not
    /// from this write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the document vanished, or a store
    /// error. The handle stays dirty on failure.
    pub fn persist(&mut self, store: &dyn DocumentStore) -> CoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(doc) = self.snapshot.as_ref() else {
            return Err(CoreError::invalid_operation(format!(
                "{} is dirty but was never loaded",
                self.key
            )));
        };
        if !store.replace(self.key.namespace(), self.key.id(), doc, false)? {
            return Err(CoreError::not_found(self.key.clone()));
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::Namespace;
    use doctxn_codec::Value;

    fn setup() -> (InMemoryStore, DocumentKey) {
        let store = InMemoryStore::new();
        let ns = Namespace::new("db", "c");
        store
            .insert(&ns, Document::with_id(1).with("value", 100))
            .unwrap();
        (store, ns.key(1))
    }

    #[test]
    fn load_caches_first_read() {
        let (store, key) = setup();
        let mut doc_ref = DocumentRef::new(key.clone());
        assert_eq!(doc_ref.load(&store).unwrap().get_integer("value").unwrap(), 100);

        store
            .replace(key.namespace(), key.id(), &Document::new().with("value", 5), false)
            .unwrap();
        assert_eq!(doc_ref.load(&store).unwrap().get_integer("value").unwrap(), 100);
    }

    #[test]
    fn load_missing_document() {
        let (store, key) = setup();
        let mut doc_ref = DocumentRef::new(key.namespace().key(2));
        assert!(matches!(doc_ref.load(&store), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn persist_writes_only_when_dirty() {
        let (store, key) = setup();
        let mut doc_ref = DocumentRef::new(key.clone());
        doc_ref.load(&store).unwrap();
        doc_ref.snapshot_mut().unwrap().insert("value", 1);

        doc_ref.persist(&store).unwrap();
        let stored = store.find_by_id(key.namespace(), key.id()).unwrap().unwrap();
        assert_eq!(stored.get_integer("value").unwrap(), 100);

        doc_ref.mark_dirty();
        doc_ref.persist(&store).unwrap();
        assert!(!doc_ref.is_dirty());
        let stored = store.find_by_id(key.namespace(), key.id()).unwrap().unwrap();
        assert_eq!(stored.get_integer("value").unwrap(), 1);
    }

    #[test]
    fn replace_snapshot_marks_dirty() {
        let (_, key) = setup();
        let mut doc_ref = DocumentRef::new(key);
        doc_ref.replace_snapshot(Document::with_id(1).with("value", Value::Null));
        assert!(doc_ref.is_dirty());
        assert!(!doc_ref.holds_lock());
    }

    #[test]
    fn persist_reports_vanished_document() {
        let store = InMemoryStore::new();
        let mut doc_ref = DocumentRef::new(Namespace::new("db", "c").key(9));
        doc_ref.replace_snapshot(Document::with_id(9));
        assert!(matches!(doc_ref.persist(&store), Err(CoreError::NotFound { .. })));
        assert!(doc_ref.is_dirty());
    }
}
