//! Identifier types: namespaces, document keys and transaction ids.

use doctxn_codec::{CodecError, CodecResult, Document, Value};
use std::fmt;
use uuid::Uuid;

/// A (database, collection) pair addressing one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the key of the document with `id` in this collection.
    pub fn key(&self, id: impl Into<Value>) -> DocumentKey {
        DocumentKey::new(self.clone(), id)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Full address of a document: its namespace plus its `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    namespace: Namespace,
    id: Value,
}

impl DocumentKey {
    const DB: &'static str = "db";
    const COLLECTION: &'static str = "collection";
    const ID: &'static str = "id";

    /// Creates a document key.
    pub fn new(namespace: Namespace, id: impl Into<Value>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the document id.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Encodes the key as `{db, collection, id}` for transaction records.
    pub fn to_document(&self) -> Document {
        Document::new()
            .with(Self::DB, self.namespace.database())
            .with(Self::COLLECTION, self.namespace.collection())
            .with(Self::ID, self.id.clone())
    }

    /// Decodes a key written by [`to_document`](Self::to_document).
    ///
    /// # Errors
    ///
    /// Returns a codec error if a field is missing or mistyped.
    pub fn from_document(doc: &Document) -> CodecResult<Self> {
        let database = doc.get_text(Self::DB)?;
        let collection = doc.get_text(Self::COLLECTION)?;
        let id = doc
            .get(Self::ID)
            .cloned()
            .ok_or_else(|| CodecError::missing_field(Self::ID))?;
        Ok(Self::new(Namespace::new(database, collection), id))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:?}]", self.namespace, self.id)
    }
}

/// Unique identifier of a transaction (random UUID v4).
///
/// Persisted as hyphenated text in the record's `_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`uuid::Error`] if the text is not a UUID.
    pub fn parse(text: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(text).map(Self)
    }

    /// Returns the id as a document value.
    pub fn to_value(&self) -> Value {
        Value::Text(self.0.to_string())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_display() {
        let ns = Namespace::new("bank", "accounts");
        assert_eq!(ns.to_string(), "bank.accounts");
        assert_eq!(ns.key(7).id(), &Value::Integer(7));
    }

    #[test]
    fn document_key_survives_record_encoding() {
        let key = Namespace::new("db1", "c1").key("doc-1");
        let decoded = DocumentKey::from_document(&key.to_document()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn document_key_rejects_partial_encoding() {
        let doc = Document::new().with("db", "db1").with("id", 1);
        assert_eq!(
            DocumentKey::from_document(&doc),
            Err(CodecError::missing_field("collection"))
        );
    }

    #[test]
    fn transaction_ids_are_unique_and_parseable() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert_eq!(TransactionId::parse(&a.to_string()).unwrap(), a);
        assert!(TransactionId::parse("not-a-uuid").is_err());
    }
}
