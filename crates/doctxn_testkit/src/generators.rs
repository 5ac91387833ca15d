//! Property-based test generators using proptest.

use doctxn_codec::{Document, Value, ID_FIELD};
use proptest::prelude::*;

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z]{0,8}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for values nested up to three levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|fields| Value::Document(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for documents carrying the given `_id`.
pub fn document_strategy(id: Value) -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-z]{1,6}", value_strategy(), 0..6).prop_map(move |fields| {
        let mut doc: Document = fields
            .into_iter()
            .filter(|(key, _)| key != ID_FIELD)
            .collect();
        doc.insert(ID_FIELD, id.clone());
        doc
    })
}

/// A transfer between two accounts, by account index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTransfer {
    /// Source account.
    pub from: usize,
    /// Target account, never equal to `from`.
    pub to: usize,
    /// Amount moved, always positive.
    pub amount: i64,
}

/// Strategy for transfers among `accounts` accounts.
///
/// `accounts` must be at least 2.
pub fn planned_transfer_strategy(
    accounts: usize,
    max_amount: i64,
) -> impl Strategy<Value = PlannedTransfer> {
    (0..accounts, 1..accounts, 1..=max_amount).prop_map(move |(from, offset, amount)| {
        PlannedTransfer {
            from,
            to: (from + offset) % accounts,
            amount,
        }
    })
}

/// Strategy for starting balances.
pub fn balances_strategy(accounts: usize, max_balance: i64) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..=max_balance, accounts)
}
