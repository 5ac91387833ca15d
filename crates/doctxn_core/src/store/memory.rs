//! In-memory document store.

use super::collections::{Collections, Validator};
use super::{DocumentStore, Filter, ReturnDocument, StoreResult, Update};
use crate::types::Namespace;
use doctxn_codec::{Document, Value};
use parking_lot::RwLock;
use std::sync::Arc;

/// A document store kept entirely in memory.
///
/// Every operation runs under one lock, so all operations are linearizable.
///
/// # Example
///
/// ```rust
/// use doctxn_core::{DocumentStore, InMemoryStore, Namespace};
/// use doctxn_codec::{Document, Value};
///
/// let store = InMemoryStore::new();
/// let accounts = Namespace::new("bank", "accounts");
/// store.insert(&accounts, Document::with_id(1).with("value", 100)).unwrap();
/// assert!(store.find_by_id(&accounts, &Value::from(1)).unwrap().is_some());
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a write validator on a collection.
    ///
    /// Every subsequent insert, replace and update whose result the validator
    /// rejects fails with [`StoreError::Validation`](super::StoreError::Validation).
    pub fn set_validator<F>(&self, namespace: Namespace, validator: F)
    where
        F: Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    {
        let validator: Validator = Arc::new(validator);
        self.inner.write().set_validator(namespace, validator);
    }

    /// Removes a collection's validator.
    pub fn clear_validator(&self, namespace: &Namespace) {
        self.inner.write().remove_validator(namespace);
    }

    /// Number of documents in a collection.
    pub fn count(&self, namespace: &Namespace) -> usize {
        self.inner.read().len(namespace)
    }
}

impl DocumentStore for InMemoryStore {
    fn find_by_id(&self, namespace: &Namespace, id: &Value) -> StoreResult<Option<Document>> {
        Ok(self.inner.read().get(namespace, id).cloned())
    }

    fn replace(
        &self,
        namespace: &Namespace,
        id: &Value,
        doc: &Document,
        upsert: bool,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        match inner.plan_replace(namespace, id, doc, upsert)? {
            Some(replacement) => {
                inner.put(namespace, replacement);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let mut inner = self.inner.write();
        let Some((before, after)) = inner.plan_update(namespace, filter, update)? else {
            return Ok(None);
        };
        inner.put(namespace, after.clone());
        Ok(Some(match returning {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        }))
    }

    fn insert(&self, namespace: &Namespace, doc: Document) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let doc = inner.plan_insert(namespace, doc)?;
        inner.put(namespace, doc);
        Ok(())
    }

    fn find(&self, namespace: &Namespace, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self.inner.read().find(namespace, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Condition, StoreError};
    use std::thread;

    fn accounts() -> Namespace {
        Namespace::new("bank", "accounts")
    }

    #[test]
    fn replace_requires_match_unless_upsert() {
        let store = InMemoryStore::new();
        let id = Value::from(1);
        let doc = Document::new().with("value", 10);

        assert!(!store.replace(&accounts(), &id, &doc, false).unwrap());
        assert!(store.replace(&accounts(), &id, &doc, true).unwrap());
        assert_eq!(
            store.find_by_id(&accounts(), &id).unwrap(),
            Some(Document::with_id(1).with("value", 10))
        );
    }

    #[test]
    fn find_one_and_update_returns_requested_version() {
        let store = InMemoryStore::new();
        store
            .insert(&accounts(), Document::with_id(1).with("value", 1))
            .unwrap();

        let before = store
            .find_one_and_update(
                &accounts(),
                &Filter::by_id(1),
                &Update::new().set("value", 2),
                ReturnDocument::Before,
            )
            .unwrap()
            .unwrap();
        assert_eq!(before.get_integer("value").unwrap(), 1);

        let after = store
            .find_one_and_update(
                &accounts(),
                &Filter::by_id(1),
                &Update::new().set("value", 3),
                ReturnDocument::After,
            )
            .unwrap()
            .unwrap();
        assert_eq!(after.get_integer("value").unwrap(), 3);
    }

    #[test]
    fn update_rejects_id_changes() {
        let store = InMemoryStore::new();
        store.insert(&accounts(), Document::with_id(1)).unwrap();
        let result = store.find_one_and_update(
            &accounts(),
            &Filter::by_id(1),
            &Update::new().set("_id", 2),
            ReturnDocument::After,
        );
        assert!(matches!(result, Err(StoreError::ImmutableId { .. })));
    }

    #[test]
    fn conditional_update_has_single_winner() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(&accounts(), Document::with_id(1)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .find_one_and_update(
                            &accounts(),
                            &Filter::and([
                                Filter::by_id(1),
                                Filter::field("owner", Condition::Absent),
                            ]),
                            &Update::new().set("owner", i),
                            ReturnDocument::After,
                        )
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn collections_are_isolated_by_namespace() {
        let store = InMemoryStore::new();
        let other = Namespace::new("bank2", "accounts");
        store.insert(&accounts(), Document::with_id(1)).unwrap();
        store.insert(&other, Document::with_id(1)).unwrap();

        assert_eq!(store.count(&accounts()), 1);
        assert_eq!(store.count(&other), 1);
        assert_eq!(store.find(&other, &Filter::All).unwrap().len(), 1);
    }
}
