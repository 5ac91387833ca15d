//! End-to-end transfer scenarios against every reference store.

use doctxn_codec::{Document, Timestamp, Value};
use doctxn_core::{
    CoreError, DocumentStore, ErrorKind, Filter, InMemoryStore, LogStore, ReturnDocument,
    StoreError, TransactionStatus, Update, LOCK_FIELD,
};
use doctxn_storage::InMemoryBackend;
use doctxn_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn pair() -> [doctxn_core::DocumentKey; 2] {
    [accounts().key("A"), accounts().key("B")]
}

fn record_status(store: &TestStore, id: doctxn_core::TransactionId) -> TransactionStatus {
    manager(store.shared())
        .load_record(&id)
        .unwrap()
        .unwrap()
        .status()
}

fn raw(store: &dyn DocumentStore, id: &str) -> Document {
    store
        .find_by_id(&accounts(), &Value::from(id))
        .unwrap()
        .unwrap()
}

#[test]
fn transfer_applies() {
    init_test_tracing();
    with_each_store(|store| {
        seed_accounts(&**store, &[("A", 100), ("B", 50)]);
        let id = manager(store.shared()).run(transfer(), 10, pair()).unwrap();

        assert_eq!(balance(&**store, "A"), 90);
        assert_eq!(balance(&**store, "B"), 60);
        assert_eq!(record_status(store, id), TransactionStatus::Applied);
        assert!(!raw(&**store, "A").contains_key(LOCK_FIELD));
        assert!(!raw(&**store, "B").contains_key(LOCK_FIELD));
    });
}

#[test]
fn missing_participant_is_reported_and_cancelled() {
    with_each_store(|store| {
        seed_accounts(&**store, &[("A", 100)]);
        let mut txn = manager(store.shared()).begin(transfer(), 10);
        for key in pair() {
            txn.add_participant(key).unwrap();
        }
        let err = txn.execute().unwrap_err();

        assert!(err.is_rolled_back());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(raw(&**store, "A"), Document::with_id("A").with(BALANCE, 100));
        assert_eq!(record_status(store, txn.id()), TransactionStatus::Cancelled);
    });
}

#[test]
fn non_numeric_balance_fails_the_work() {
    with_each_store(|store| {
        Seed::from_json(
            &json!({
                "database": "bank",
                "collection": "accounts",
                "documents": [
                    { "_id": "A", "value": 100 },
                    { "_id": "B", "value": "dummy" }
                ]
            })
            .to_string(),
        )
        .apply(&**store);

        let mut txn = manager(store.shared()).begin(transfer(), 10);
        for key in pair() {
            txn.add_participant(key).unwrap();
        }
        let err = txn.execute().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ApplicationFailure);
        assert_eq!(raw(&**store, "A"), json_doc(json!({ "_id": "A", "value": 100 })));
        assert_eq!(raw(&**store, "B"), json_doc(json!({ "_id": "B", "value": "dummy" })));
        assert_eq!(record_status(store, txn.id()), TransactionStatus::Cancelled);
    });
}

fn at_most_100(doc: &Document) -> Result<(), String> {
    match doc.get_integer(BALANCE) {
        Ok(v) if v > 100 => Err(format!("balance {v} exceeds 100")),
        _ => Ok(()),
    }
}

fn assert_rejected_write_back_restores(store: Arc<dyn DocumentStore>) {
    seed_accounts(store.as_ref(), &[("A", 100), ("B", 95)]);
    let manager = manager(Arc::clone(&store));
    let mut txn = manager.begin(transfer(), 10);
    for key in pair() {
        txn.add_participant(key).unwrap();
    }
    let err = txn.execute().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreFailure);
    assert!(matches!(
        err.root_cause(),
        CoreError::Store(StoreError::Validation { .. })
    ));
    assert_eq!(raw(store.as_ref(), "A"), Document::with_id("A").with(BALANCE, 100));
    assert_eq!(raw(store.as_ref(), "B"), Document::with_id("B").with(BALANCE, 95));
    let record = manager.load_record(&txn.id()).unwrap().unwrap();
    assert_eq!(record.status(), TransactionStatus::Cancelled);
}

#[test]
fn rejected_write_back_restores_both_accounts() {
    let memory = InMemoryStore::new();
    memory.set_validator(accounts(), at_most_100);
    assert_rejected_write_back_restores(Arc::new(memory));

    let log = LogStore::open(Box::new(InMemoryBackend::new())).unwrap();
    log.set_validator(accounts(), at_most_100);
    assert_rejected_write_back_restores(Arc::new(log));
}

#[test]
fn waits_for_a_lock_released_later() {
    let store = TestStore::memory();
    seed_accounts(&*store, &[("A", 100), ("B", 50)]);
    store
        .find_one_and_update(
            &accounts(),
            &Filter::by_id("B"),
            &Update::new().set(LOCK_FIELD, Timestamp::now()),
            ReturnDocument::After,
        )
        .unwrap()
        .unwrap();

    let holder = {
        let shared = store.shared();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            shared
                .find_one_and_update(
                    &accounts(),
                    &Filter::by_id("B"),
                    &Update::new().unset(LOCK_FIELD),
                    ReturnDocument::After,
                )
                .unwrap();
        })
    };

    let start = Instant::now();
    manager(store.shared()).run(transfer(), 10, pair()).unwrap();
    holder.join().unwrap();

    assert!(start.elapsed() >= Duration::from_millis(40));
    assert_eq!(balance(&*store, "A"), 90);
    assert_eq!(balance(&*store, "B"), 60);
}

#[test]
fn second_execute_is_a_no_op() {
    let store = TestStore::memory();
    seed_accounts(&*store, &[("A", 100), ("B", 50)]);
    let mut txn = manager(store.shared()).begin(transfer(), 10);
    for key in pair() {
        txn.add_participant(key).unwrap();
    }
    txn.execute().unwrap();
    txn.execute().unwrap();

    assert_eq!(balance(&*store, "A"), 90);
    assert_eq!(balance(&*store, "B"), 60);
}

#[test]
fn applied_transfer_survives_restart() {
    let backend = InMemoryBackend::new();
    let id = {
        let store = TestStore::log(&backend);
        seed_accounts(&*store, &[("A", 100), ("B", 50)]);
        manager(store.shared()).run(transfer(), 10, pair()).unwrap()
    };

    let store = TestStore::log(&backend);
    assert_eq!(balance(&*store, "A"), 90);
    assert_eq!(balance(&*store, "B"), 60);
    assert_eq!(record_status(&store, id), TransactionStatus::Applied);
}
