//! Atomicity: a failed transaction leaves every participant as it found it.

use doctxn_codec::{Document, Value};
use doctxn_core::{
    work_fn, DocumentStore, Filter, InMemoryStore, LockConfig, Namespace, TransactionManager,
    TransactionStatus, TxnConfig, LOCK_FIELD,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const ACCOUNTS: i64 = 3;

fn accounts() -> Namespace {
    Namespace::new("bank", "accounts")
}

#[derive(Debug, Clone)]
struct Step {
    from: i64,
    to: i64,
    amount: i64,
    /// Fail after mutating this many participants.
    fail_after: Option<usize>,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (0..ACCOUNTS, 1..ACCOUNTS, 1..50i64, prop::option::of(0..=2usize)).prop_map(
        |(from, offset, amount, fail_after)| Step {
            from,
            to: (from + offset) % ACCOUNTS,
            amount,
            fail_after,
        },
    )
}

fn balances(store: &InMemoryStore) -> Vec<Document> {
    store.find(&accounts(), &Filter::All).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn failed_steps_change_nothing(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let store = Arc::new(InMemoryStore::new());
        for id in 0..ACCOUNTS {
            store.insert(&accounts(), Document::with_id(id).with("value", 100)).unwrap();
        }
        let manager = TransactionManager::new(
            store.clone(),
            Namespace::new("bank", "transactions"),
            TxnConfig::new().lock(LockConfig::new().backoff(Duration::from_millis(1))),
        );

        for step in steps {
            let before = balances(&store);
            let fail_after = step.fail_after;
            let work = work_fn("transfer", move |payload, docs| {
                let amount = payload.as_integer().ok_or("amount")?;
                for (i, delta) in [-amount, amount].into_iter().enumerate() {
                    if fail_after == Some(i) {
                        return Err("injected failure".into());
                    }
                    let doc = docs.get_mut(i).ok_or("missing participant")?;
                    let value = doc.get_integer("value")?;
                    doc.insert("value", value + delta);
                }
                if fail_after == Some(2) {
                    return Err("injected failure".into());
                }
                Ok(())
            });

            let mut txn = manager.begin(work, step.amount);
            txn.add_participant(accounts().key(step.from)).unwrap();
            txn.add_participant(accounts().key(step.to)).unwrap();
            let outcome = txn.execute();

            if step.fail_after.is_some() {
                prop_assert!(outcome.unwrap_err().is_rolled_back());
                prop_assert_eq!(txn.status(), TransactionStatus::Cancelled);
                prop_assert_eq!(balances(&store), before);
            } else {
                prop_assert!(outcome.is_ok());
                prop_assert_eq!(txn.status(), TransactionStatus::Applied);
            }

            let docs = balances(&store);
            let total: i64 = docs.iter().map(|d| d.get_integer("value").unwrap()).sum();
            prop_assert_eq!(total, 100 * ACCOUNTS);
            prop_assert!(docs.iter().all(|d| d.get(LOCK_FIELD).is_none()));
        }

        let records = store
            .find(&Namespace::new("bank", "transactions"), &Filter::All)
            .unwrap();
        prop_assert!(records
            .iter()
            .all(|r| r.get("status") != Some(&Value::from("pending"))));
    }
}
