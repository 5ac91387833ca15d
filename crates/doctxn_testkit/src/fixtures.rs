//! Test fixtures and store helpers.
//!
//! Provides ready-made stores, the bank namespaces most tests use, JSON
//! seed documents and a tracing subscriber for test output.

use doctxn_codec::{Document, Value};
use doctxn_core::{
    DocumentStore, Filter, InMemoryStore, LockConfig, LogStore, Namespace, TransactionManager,
    TxnConfig, LOCK_FIELD,
};
use doctxn_storage::InMemoryBackend;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Balance field of the bank fixtures.
pub const BALANCE: &str = "value";

/// A test store with automatic cleanup.
pub struct TestStore {
    store: Arc<dyn DocumentStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            _temp_dir: None,
        }
    }

    /// Creates a log store backed by a file in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LogStore::open_path(&temp_dir.path().join("doctxn.log"))
            .expect("Failed to open log store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Creates a log store over a shared in-memory backend.
    ///
    /// Opening another store over a clone of `backend` replays everything
    /// this one wrote, which is how tests simulate a restart.
    pub fn log(backend: &InMemoryBackend) -> Self {
        let store =
            LogStore::open(Box::new(backend.clone())).expect("Failed to replay log store");
        Self {
            store: Arc::new(store),
            _temp_dir: None,
        }
    }

    /// Returns the log path if file-based, None otherwise.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("doctxn.log"))
    }

    /// Returns a shared handle for a [`TransactionManager`].
    pub fn shared(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = dyn DocumentStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

/// Runs a test against an in-memory store and then a file-backed log store.
pub fn with_each_store<F>(mut f: F)
where
    F: FnMut(&TestStore),
{
    f(&TestStore::memory());
    f(&TestStore::file());
}

/// The bank account collection.
pub fn accounts() -> Namespace {
    Namespace::new("bank", "accounts")
}

/// The bank transaction record collection.
pub fn transactions() -> Namespace {
    Namespace::new("bank", "transactions")
}

/// Transaction settings for tests: short backoff and a bounded wait.
pub fn fast_config() -> TxnConfig {
    TxnConfig::new().lock(
        LockConfig::new()
            .backoff(Duration::from_millis(1))
            .timeout(Duration::from_secs(5)),
    )
}

/// A manager over `store` recording into [`transactions`].
pub fn manager(store: Arc<dyn DocumentStore>) -> TransactionManager {
    TransactionManager::new(store, transactions(), fast_config())
}

/// Inserts one account per `(id, balance)` pair.
pub fn seed_accounts(store: &dyn DocumentStore, balances: &[(&str, i64)]) {
    for (id, balance) in balances {
        store
            .insert(&accounts(), Document::with_id(*id).with(BALANCE, *balance))
            .expect("Failed to seed account");
    }
}

/// Returns an account's balance.
pub fn balance(store: &dyn DocumentStore, id: &str) -> i64 {
    store
        .find_by_id(&accounts(), &Value::from(id))
        .expect("Failed to read account")
        .unwrap_or_else(|| panic!("account {id} does not exist"))
        .get_integer(BALANCE)
        .expect("Account balance is not an integer")
}

/// Sums every account balance.
pub fn total_balance(store: &dyn DocumentStore) -> i64 {
    store
        .find(&accounts(), &Filter::All)
        .expect("Failed to scan accounts")
        .iter()
        .map(|doc| doc.get_integer(BALANCE).expect("Account balance is not an integer"))
        .sum()
}

/// Counts documents in `namespace` that still carry a lock timestamp.
pub fn locked_documents(store: &dyn DocumentStore, namespace: &Namespace) -> usize {
    store
        .find(namespace, &Filter::All)
        .expect("Failed to scan collection")
        .iter()
        .filter(|doc| matches!(doc.get(LOCK_FIELD), Some(Value::Timestamp(_))))
        .count()
}

/// Converts a JSON value to a document value.
///
/// # Panics
///
/// Panics on numbers that are not `i64`; the document model has no floats.
pub fn json_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Integer(
            n.as_i64()
                .unwrap_or_else(|| panic!("fixture number {n} is not an i64")),
        ),
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_value).collect()),
        Json::Object(map) => Value::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), json_value(value)))
                .collect(),
        ),
    }
}

/// Converts a JSON object, usually written with `serde_json::json!`, to a document.
pub fn json_doc(json: serde_json::Value) -> Document {
    match json_value(&json) {
        Value::Document(doc) => doc,
        other => panic!("fixture is {}, not an object", other.type_name()),
    }
}

/// A collection's worth of seed documents.
///
/// ```json
/// { "database": "bank", "collection": "accounts",
///   "documents": [ { "_id": "a", "value": 100 } ] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Seed {
    /// Target database.
    pub database: String,
    /// Target collection.
    pub collection: String,
    /// Documents to insert.
    pub documents: Vec<serde_json::Value>,
}

impl Seed {
    /// Parses a seed from JSON text.
    pub fn from_json(text: &str) -> Self {
        serde_json::from_str(text).expect("Invalid seed fixture")
    }

    /// Loads a seed from a JSON file.
    pub fn from_file(path: &Path) -> Self {
        let text = std::fs::read_to_string(path).expect("Failed to read seed fixture");
        Self::from_json(&text)
    }

    /// The namespace the seed targets.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.as_str(), self.collection.as_str())
    }

    /// Inserts every document.
    pub fn apply(&self, store: &dyn DocumentStore) {
        let namespace = self.namespace();
        for doc in &self.documents {
            store
                .insert(&namespace, json_doc(doc.clone()))
                .expect("Failed to insert seed document");
        }
    }
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`, defaulting to `warn`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_doc_conversion() {
        let doc = json_doc(json!({
            "_id": "a",
            "value": 100,
            "tags": ["x", null],
            "owner": { "name": "ann", "active": true }
        }));

        assert_eq!(doc.id(), Some(&Value::from("a")));
        assert_eq!(doc.get_integer("value").unwrap(), 100);
        assert_eq!(
            doc.get_array("tags").unwrap(),
            &[Value::from("x"), Value::Null][..]
        );
        let owner = doc.get_document("owner").unwrap();
        assert_eq!(owner.get("active"), Some(&Value::Bool(true)));
    }

    #[test]
    #[should_panic(expected = "not an i64")]
    fn test_json_float_rejected() {
        json_value(&json!(1.5));
    }

    #[test]
    fn test_seed_applies_documents() {
        let seed = Seed::from_json(
            r#"{ "database": "bank", "collection": "accounts",
                 "documents": [ { "_id": "a", "value": 100 }, { "_id": "b", "value": 50 } ] }"#,
        );
        let store = TestStore::memory();
        seed.apply(&*store);

        assert_eq!(seed.namespace(), accounts());
        assert_eq!(total_balance(&*store), 150);
        assert_eq!(balance(&*store, "b"), 50);
    }

    #[test]
    fn test_file_store_has_path() {
        let store = TestStore::file();
        seed_accounts(&*store, &[("a", 1)]);
        assert!(store.path().unwrap().exists());
        assert!(TestStore::memory().path().is_none());
    }

    #[test]
    fn test_log_store_reopens_from_backend() {
        let backend = InMemoryBackend::new();
        seed_accounts(&*TestStore::log(&backend), &[("a", 7)]);

        let reopened = TestStore::log(&backend);
        assert_eq!(balance(&*reopened, "a"), 7);
    }

    #[test]
    fn test_locked_documents_counts_timestamps_only() {
        let store = TestStore::memory();
        store
            .insert(
                &accounts(),
                Document::with_id("a").with(LOCK_FIELD, doctxn_codec::Timestamp::now()),
            )
            .unwrap();
        store
            .insert(&accounts(), Document::with_id("b").with(LOCK_FIELD, Value::Null))
            .unwrap();
        store.insert(&accounts(), Document::with_id("c")).unwrap();

        assert_eq!(locked_documents(&*store, &accounts()), 1);
    }

    #[test]
    fn test_init_tracing_twice() {
        init_test_tracing();
        init_test_tracing();
    }
}
