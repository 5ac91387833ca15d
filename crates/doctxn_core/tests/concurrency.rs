//! Contention tests: many threads running transactions over shared documents.

use doctxn_codec::{Document, Timestamp, Value};
use doctxn_core::{
    lock, work_fn, CancelHandle, DocumentRef, DocumentStore, Filter, InMemoryStore, LockConfig,
    Namespace, ReturnDocument, StoreResult, TransactionManager, TxnConfig, UnitOfWork, Update,
    LOCK_FIELD,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn counters() -> Namespace {
    Namespace::new("app", "counters")
}

fn manager(store: Arc<InMemoryStore>) -> TransactionManager {
    let lock = LockConfig::new().backoff(Duration::from_millis(1));
    TransactionManager::new(
        store,
        Namespace::new("app", "transactions"),
        TxnConfig::new().lock(lock),
    )
}

fn increment_all() -> Arc<dyn UnitOfWork> {
    work_fn("increment", |_, docs| {
        for i in 0..docs.len() {
            let doc = docs.get_mut(i).ok_or("missing participant")?;
            let n = doc.get_integer("n")?;
            doc.insert("n", n + 1);
        }
        Ok(())
    })
}

fn read_n(store: &InMemoryStore, id: i64) -> i64 {
    store
        .find_by_id(&counters(), &Value::from(id))
        .unwrap()
        .unwrap()
        .get_integer("n")
        .unwrap()
}

#[test]
fn no_lost_updates_under_contention() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let store = Arc::new(InMemoryStore::new());
    for id in 1..=2 {
        store
            .insert(&counters(), Document::with_id(id).with("n", 0))
            .unwrap();
    }
    let manager = manager(Arc::clone(&store));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    manager
                        .run(increment_all(), (), [counters().key(1), counters().key(2)])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (THREADS * PER_THREAD) as i64;
    assert_eq!(read_n(&store, 1), expected);
    assert_eq!(read_n(&store, 2), expected);
}

#[test]
fn disjoint_transactions_do_not_block_each_other() {
    let store = Arc::new(InMemoryStore::new());
    for id in 1..=4 {
        store
            .insert(&counters(), Document::with_id(id).with("n", 0))
            .unwrap();
    }
    let manager = manager(Arc::clone(&store));

    let handles: Vec<_> = [(1, 2), (3, 4)]
        .into_iter()
        .map(|(a, b)| {
            let manager = manager.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    manager
                        .run(increment_all(), (), [counters().key(a), counters().key(b)])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in 1..=4 {
        assert_eq!(read_n(&store, id), 50);
    }
}

#[test]
fn stale_lock_is_recovered_by_contenders() {
    const THREADS: usize = 6;

    let store = Arc::new(InMemoryStore::new());
    let stale = Timestamp::now().saturating_sub(Duration::from_secs(120));
    store
        .insert(
            &counters(),
            Document::with_id(1).with("n", 0).with(LOCK_FIELD, stale),
        )
        .unwrap();
    let manager = manager(Arc::clone(&store));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                manager
                    .run(increment_all(), (), [counters().key(1)])
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(read_n(&store, 1), THREADS as i64);
    let doc = store
        .find_by_id(&counters(), &Value::from(1))
        .unwrap()
        .unwrap();
    assert!(!doc.contains_key(LOCK_FIELD));
}

/// Counts successful stale-lock breaks: the only update that returns a
/// document whose lock was just set to `null`.
struct BreakCounter {
    inner: InMemoryStore,
    breaks: AtomicUsize,
}

impl DocumentStore for BreakCounter {
    fn find_by_id(&self, ns: &Namespace, id: &Value) -> StoreResult<Option<Document>> {
        self.inner.find_by_id(ns, id)
    }

    fn replace(&self, ns: &Namespace, id: &Value, doc: &Document, upsert: bool) -> StoreResult<bool> {
        self.inner.replace(ns, id, doc, upsert)
    }

    fn find_one_and_update(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &Update,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let result = self.inner.find_one_and_update(ns, filter, update, returning)?;
        if result.as_ref().and_then(|d| d.get(LOCK_FIELD)) == Some(&Value::Null) {
            self.breaks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    fn insert(&self, ns: &Namespace, doc: Document) -> StoreResult<()> {
        self.inner.insert(ns, doc)
    }

    fn find(&self, ns: &Namespace, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.inner.find(ns, filter)
    }
}

#[test]
fn contenders_break_a_stale_lock_exactly_once() {
    const CONTENDERS: usize = 8;
    let store = Arc::new(BreakCounter {
        inner: InMemoryStore::new(),
        breaks: AtomicUsize::new(0),
    });
    let stale = Timestamp::now().saturating_sub(Duration::from_secs(120));
    store
        .insert(&counters(), Document::with_id(1).with(LOCK_FIELD, stale))
        .unwrap();
    let barrier = Arc::new(Barrier::new(CONTENDERS));

    let handles: Vec<_> = (0..CONTENDERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let config = LockConfig::new()
                    .backoff(Duration::from_millis(1))
                    .timeout(Duration::from_secs(5));
                let mut doc_ref = DocumentRef::new(counters().key(1));
                barrier.wait();
                lock::acquire(store.as_ref(), &mut doc_ref, &config, &CancelHandle::new())
                    .unwrap();
                thread::sleep(Duration::from_millis(1));
                lock::release(store.as_ref(), &mut doc_ref).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.breaks.load(Ordering::SeqCst), 1);
    let doc = store
        .find_by_id(&counters(), &Value::from(1))
        .unwrap()
        .unwrap();
    assert!(!doc.contains_key(LOCK_FIELD));
}

#[test]
fn cancel_handle_interrupts_a_waiting_transaction() {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert(
            &counters(),
            Document::with_id(1).with("n", 0).with(LOCK_FIELD, Timestamp::now()),
        )
        .unwrap();
    let manager = manager(Arc::clone(&store));

    let mut txn = manager.begin(increment_all(), ());
    txn.add_participant(counters().key(1)).unwrap();
    let cancel = txn.cancel_handle();

    let waiter = thread::spawn(move || {
        let result = txn.execute();
        (txn, result)
    });
    thread::sleep(Duration::from_millis(30));
    cancel.cancel();

    let (txn, result) = waiter.join().unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), doctxn_core::ErrorKind::LockTimeout);
    assert_eq!(txn.status(), doctxn_core::TransactionStatus::Cancelled);
    assert_eq!(read_n(&store, 1), 0);
}
