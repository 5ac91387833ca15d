//! Collection contents shared by the in-memory and log-backed stores.
//!
//! Every write is split into a *plan* step, which validates the request and
//! computes the resulting document without touching state, and a [`put`]
//! step that installs it. The log store appends the planned document to its
//! log between the two.
//!
//! [`put`]: Collections::put

use super::error::{StoreError, StoreResult};
use super::filter::{Filter, Update};
use crate::types::Namespace;
use doctxn_codec::{Document, Value, ID_FIELD};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Write validator for one collection.
pub type Validator = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;

/// Documents of every collection, keyed by `_id` in id order.
#[derive(Default)]
pub(crate) struct Collections {
    data: HashMap<Namespace, BTreeMap<Value, Document>>,
    validators: HashMap<Namespace, Validator>,
}

impl Collections {
    pub(crate) fn set_validator(&mut self, namespace: Namespace, validator: Validator) {
        self.validators.insert(namespace, validator);
    }

    pub(crate) fn remove_validator(&mut self, namespace: &Namespace) {
        self.validators.remove(namespace);
    }

    pub(crate) fn get(&self, namespace: &Namespace, id: &Value) -> Option<&Document> {
        self.data.get(namespace)?.get(id)
    }

    pub(crate) fn find(&self, namespace: &Namespace, filter: &Filter) -> Vec<Document> {
        self.matching(namespace, filter).cloned().collect()
    }

    pub(crate) fn len(&self, namespace: &Namespace) -> usize {
        self.data.get(namespace).map_or(0, BTreeMap::len)
    }

    /// Validates an insert, returning the document to store.
    pub(crate) fn plan_insert(&self, namespace: &Namespace, doc: Document) -> StoreResult<Document> {
        let id = doc.id().ok_or_else(|| StoreError::MissingId {
            namespace: namespace.clone(),
        })?;
        if self.get(namespace, id).is_some() {
            return Err(StoreError::DuplicateKey {
                namespace: namespace.clone(),
                id: id.clone(),
            });
        }
        self.validate(namespace, &doc)?;
        Ok(doc)
    }

    /// Validates a replace. `None` means nothing matched and no upsert.
    pub(crate) fn plan_replace(
        &self,
        namespace: &Namespace,
        id: &Value,
        doc: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        if doc.id().is_some_and(|own| own != id) {
            return Err(StoreError::ImmutableId {
                namespace: namespace.clone(),
                id: id.clone(),
            });
        }
        if self.get(namespace, id).is_none() && !upsert {
            return Ok(None);
        }

        let mut replacement = doc.clone();
        replacement.insert(ID_FIELD, id.clone());
        self.validate(namespace, &replacement)?;
        Ok(Some(replacement))
    }

    /// Validates an update of the first matching document.
    ///
    /// Returns the document before and after the update.
    pub(crate) fn plan_update(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<(Document, Document)>> {
        let Some(before) = self.matching(namespace, filter).next() else {
            return Ok(None);
        };
        if update.touches_id() {
            return Err(StoreError::ImmutableId {
                namespace: namespace.clone(),
                id: before.id().cloned().unwrap_or(Value::Null),
            });
        }

        let mut after = before.clone();
        update.apply_to(&mut after);
        self.validate(namespace, &after)?;
        Ok(Some((before.clone(), after)))
    }

    /// Installs a planned document.
    pub(crate) fn put(&mut self, namespace: &Namespace, doc: Document) {
        if let Some(id) = doc.id().cloned() {
            self.data
                .entry(namespace.clone())
                .or_default()
                .insert(id, doc);
        }
    }

    fn matching<'a>(
        &'a self,
        namespace: &Namespace,
        filter: &'a Filter,
    ) -> Box<dyn Iterator<Item = &'a Document> + 'a> {
        let Some(docs) = self.data.get(namespace) else {
            return Box::new(std::iter::empty());
        };
        match filter.pinned_id() {
            Some(id) => Box::new(docs.get(id).into_iter().filter(|d| filter.matches(d))),
            None => Box::new(docs.values().filter(|d| filter.matches(d))),
        }
    }

    fn validate(&self, namespace: &Namespace, doc: &Document) -> StoreResult<()> {
        match self.validators.get(namespace) {
            Some(validator) => validator(doc).map_err(|message| StoreError::Validation {
                namespace: namespace.clone(),
                message,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Condition;

    fn ns() -> Namespace {
        Namespace::new("db", "c")
    }

    #[test]
    fn insert_rejects_duplicates_and_missing_ids() {
        let mut collections = Collections::default();
        let doc = collections.plan_insert(&ns(), Document::with_id(1)).unwrap();
        collections.put(&ns(), doc);

        assert!(matches!(
            collections.plan_insert(&ns(), Document::with_id(1)),
            Err(StoreError::DuplicateKey { .. })
        ));
        assert!(matches!(
            collections.plan_insert(&ns(), Document::new().with("value", 1)),
            Err(StoreError::MissingId { .. })
        ));
    }

    #[test]
    fn replace_fills_in_and_protects_id() {
        let collections = Collections::default();
        let planned = collections
            .plan_replace(&ns(), &Value::Integer(3), &Document::new().with("v", 1), true)
            .unwrap()
            .unwrap();
        assert_eq!(planned.id(), Some(&Value::Integer(3)));

        assert!(collections
            .plan_replace(&ns(), &Value::Integer(3), &Document::new(), false)
            .unwrap()
            .is_none());
        assert!(matches!(
            collections.plan_replace(&ns(), &Value::Integer(3), &Document::with_id(4), true),
            Err(StoreError::ImmutableId { .. })
        ));
    }

    #[test]
    fn update_picks_first_match_in_id_order() {
        let mut collections = Collections::default();
        for id in [3, 1, 2] {
            collections.put(&ns(), Document::with_id(id).with("status", "open"));
        }

        let filter = Filter::field("status", Condition::Eq("open".into()));
        let (before, after) = collections
            .plan_update(&ns(), &filter, &Update::new().set("status", "closed"))
            .unwrap()
            .unwrap();
        assert_eq!(before.id(), Some(&Value::Integer(1)));
        assert_eq!(after.get_text("status").unwrap(), "closed");
    }

    #[test]
    fn validator_applies_to_every_write() {
        let mut collections = Collections::default();
        collections.set_validator(
            ns(),
            Arc::new(|doc: &Document| match doc.get_integer("value") {
                Ok(v) if v > 100 => Err(format!("value {v} exceeds 100")),
                _ => Ok(()),
            }),
        );
        collections.put(&ns(), Document::with_id(1).with("value", 50));

        let update = Update::new().set("value", 110);
        assert!(matches!(
            collections.plan_update(&ns(), &Filter::by_id(1), &update),
            Err(StoreError::Validation { .. })
        ));
        collections.remove_validator(&ns());
        assert!(collections
            .plan_update(&ns(), &Filter::by_id(1), &update)
            .unwrap()
            .is_some());
        assert_eq!(collections.len(&ns()), 1);
    }
}
