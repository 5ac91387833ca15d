//! Benchmark utilities.

#![warn(missing_docs)]

use doctxn_codec::{Document, Value};
use doctxn_core::{
    work_fn, DocumentStore, Namespace, StoreResult, TransactionManager, TxnConfig, UnitOfWork,
};
use rand::Rng;
use std::sync::Arc;

/// Collection holding the benchmark counters.
pub fn counters() -> Namespace {
    Namespace::new("bench", "counters")
}

/// Inserts `count` counters with ids `0..count`, each padded with
/// `payload_size` random bytes.
///
/// # Errors
///
/// Returns the first failed insert.
pub fn seed_counters(
    store: &dyn DocumentStore,
    count: usize,
    payload_size: usize,
) -> StoreResult<()> {
    let mut rng = rand::thread_rng();
    for id in 0..count {
        let payload: Vec<u8> = (0..payload_size).map(|_| rng.gen()).collect();
        let doc = Document::with_id(id as i64)
            .with("n", 0)
            .with("payload", Value::Bytes(payload));
        store.insert(&counters(), doc)?;
    }
    Ok(())
}

/// Increments `n` on every participant.
pub fn increment() -> Arc<dyn UnitOfWork> {
    work_fn("increment", |_, docs| {
        for i in 0..docs.len() {
            let doc = docs.get_mut(i).ok_or("missing participant")?;
            let n = doc.get_integer("n")?;
            doc.insert("n", n + 1);
        }
        Ok(())
    })
}

/// A manager recording into `bench.transactions`.
pub fn manager(store: Arc<dyn DocumentStore>) -> TransactionManager {
    TransactionManager::new(
        store,
        Namespace::new("bench", "transactions"),
        TxnConfig::default(),
    )
}
