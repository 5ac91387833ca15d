//! Documents: field-name keyed maps of values.

use crate::error::{CodecError, CodecResult};
use crate::timestamp::Timestamp;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// A document stored in a collection.
///
/// Fields are kept sorted by name, so two documents with the same content
/// compare and encode identically regardless of insertion order.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document holding only the given `_id`.
    #[must_use]
    pub fn with_id(id: impl Into<Value>) -> Self {
        Self::new().with(ID_FIELD, id)
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the document's `_id`, if present.
    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD)
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Looks up a field for mutation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns true if the field is present (even if it holds null).
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Reads an integer field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`].
    pub fn get_integer(&self, key: &str) -> CodecResult<i64> {
        let value = self.require(key)?;
        value
            .as_integer()
            .ok_or_else(|| CodecError::type_mismatch(key, "integer", value.type_name()))
    }

    /// Reads a text field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`].
    pub fn get_text(&self, key: &str) -> CodecResult<&str> {
        let value = self.require(key)?;
        value
            .as_text()
            .ok_or_else(|| CodecError::type_mismatch(key, "text", value.type_name()))
    }

    /// Reads a timestamp field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`].
    pub fn get_timestamp(&self, key: &str) -> CodecResult<Timestamp> {
        let value = self.require(key)?;
        value
            .as_timestamp()
            .ok_or_else(|| CodecError::type_mismatch(key, "timestamp", value.type_name()))
    }

    /// Reads an array field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`].
    pub fn get_array(&self, key: &str) -> CodecResult<&[Value]> {
        let value = self.require(key)?;
        value
            .as_array()
            .ok_or_else(|| CodecError::type_mismatch(key, "array", value.type_name()))
    }

    /// Reads a nested document field.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] or [`CodecError::TypeMismatch`].
    pub fn get_document(&self, key: &str) -> CodecResult<&Document> {
        let value = self.require(key)?;
        value
            .as_document()
            .ok_or_else(|| CodecError::type_mismatch(key, "document", value.type_name()))
    }

    fn require(&self, key: &str) -> CodecResult<&Value> {
        self.0.get(key).ok_or_else(|| CodecError::missing_field(key))
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_id() {
        let doc = Document::with_id(7).with("value", 100);
        assert_eq!(doc.id(), Some(&Value::Integer(7)));
        assert_eq!(doc.get_integer("value"), Ok(100));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn typed_getters_report_errors() {
        let doc = Document::new().with("value", "dummy");
        assert_eq!(
            doc.get_integer("value"),
            Err(CodecError::type_mismatch("value", "integer", "text"))
        );
        assert_eq!(
            doc.get_integer("missing"),
            Err(CodecError::missing_field("missing"))
        );
        assert_eq!(doc.get_text("value"), Ok("dummy"));
    }

    #[test]
    fn null_field_is_present() {
        let mut doc = Document::new().with("lock", Value::Null);
        assert!(doc.contains_key("lock"));
        assert_eq!(doc.remove("lock"), Some(Value::Null));
        assert!(!doc.contains_key("lock"));
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = Document::new().with("a", 1).with("b", 2);
        let b = Document::new().with("b", 2).with("a", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn collect_from_pairs() {
        let doc: Document = vec![("x".to_string(), Value::from(1))].into_iter().collect();
        assert_eq!(doc.get("x"), Some(&Value::Integer(1)));
    }
}
