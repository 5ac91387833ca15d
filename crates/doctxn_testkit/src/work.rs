//! Sample units of work.

use crate::fixtures::BALANCE;
use doctxn_codec::Value;
use doctxn_core::{Snapshots, UnitOfWork, WorkError, WorkRegistry};
use std::sync::Arc;

/// Kind of [`Transfer`].
pub const TRANSFER: &str = "transfer";

/// Moves `payload` units from participant 0 to participant 1.
///
/// A negative amount moves funds the other way, which lets callers keep
/// participants in a fixed order. Fails without touching either balance if
/// one would go negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transfer;

impl UnitOfWork for Transfer {
    fn kind(&self) -> &str {
        TRANSFER
    }

    fn apply(&self, payload: &Value, docs: &mut Snapshots<'_>) -> Result<(), WorkError> {
        let amount = payload
            .as_integer()
            .ok_or("transfer amount must be an integer")?;
        if docs.len() != 2 {
            return Err(format!("transfer needs 2 participants, got {}", docs.len()).into());
        }

        let from = read_balance(docs, 0)?;
        let to = read_balance(docs, 1)?;
        if from - amount < 0 || to + amount < 0 {
            return Err(format!("insufficient funds to move {amount}").into());
        }
        write_balance(docs, 0, from - amount)?;
        write_balance(docs, 1, to + amount)
    }
}

fn read_balance(docs: &Snapshots<'_>, index: usize) -> Result<i64, WorkError> {
    let doc = docs.get(index).ok_or("missing participant")?;
    Ok(doc.get_integer(BALANCE)?)
}

fn write_balance(docs: &mut Snapshots<'_>, index: usize, balance: i64) -> Result<(), WorkError> {
    docs.get_mut(index)
        .ok_or("missing participant")?
        .insert(BALANCE, balance);
    Ok(())
}

/// A shared [`Transfer`].
pub fn transfer() -> Arc<dyn UnitOfWork> {
    Arc::new(Transfer)
}

/// A registry holding [`Transfer`].
pub fn registry() -> WorkRegistry {
    WorkRegistry::new().with(transfer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use doctxn_core::{ErrorKind, TransactionStatus};

    #[test]
    fn test_transfer_moves_funds() {
        let store = TestStore::memory();
        seed_accounts(&*store, &[("a", 100), ("b", 50)]);
        let manager = manager(store.shared());

        manager
            .run(transfer(), 30, [accounts().key("a"), accounts().key("b")])
            .unwrap();
        manager
            .run(transfer(), -5, [accounts().key("a"), accounts().key("b")])
            .unwrap();

        assert_eq!(balance(&*store, "a"), 75);
        assert_eq!(balance(&*store, "b"), 75);
    }

    #[test]
    fn test_overdraft_is_rolled_back() {
        let store = TestStore::memory();
        seed_accounts(&*store, &[("a", 10), ("b", 0)]);
        let manager = manager(store.shared());

        let mut txn = manager.begin(transfer(), 11);
        txn.add_participant(accounts().key("a")).unwrap();
        txn.add_participant(accounts().key("b")).unwrap();
        let err = txn.execute().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ApplicationFailure);
        assert_eq!(txn.status(), TransactionStatus::Cancelled);
        assert_eq!(balance(&*store, "a"), 10);
        assert_eq!(balance(&*store, "b"), 0);
    }

    #[test]
    fn test_transfer_needs_two_participants() {
        let store = TestStore::memory();
        seed_accounts(&*store, &[("a", 10)]);
        let manager = manager(store.shared());

        let err = manager
            .run(transfer(), 1, [accounts().key("a")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApplicationFailure);
    }

    #[test]
    fn test_registry_knows_transfer() {
        assert_eq!(registry().get(TRANSFER).unwrap().kind(), TRANSFER);
    }
}
