//! # doctxn Core
//!
//! Multi-document transactions for document stores that only guarantee
//! atomic writes to a single document.
//!
//! The coordinator relies on nothing but point reads, unconditional
//! replaces and an atomic find-and-modify. Each participant document is
//! locked with a conditional update on a `lock` field; a durable transaction
//! record holds a backup of every participant taken before anything is
//! mutated, so a failure at any point can be undone.
//!
//! ## Architecture
//!
//! ```text
//! TransactionManager ──begin/resume──► Transaction ──► UnitOfWork
//!         │                              │    │
//!         │                    DocumentRef    TransactionRecord
//!         │                         │              │
//!         └──── RecoverySweeper     └──── DocumentStore ◄── InMemoryStore / LogStore
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use doctxn_codec::{Document, Value};
//! use doctxn_core::{
//!     work_fn, DocumentStore, InMemoryStore, Namespace, TransactionManager, TxnConfig,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let accounts = Namespace::new("bank", "accounts");
//! store.insert(&accounts, Document::with_id("a").with("value", 100)).unwrap();
//! store.insert(&accounts, Document::with_id("b").with("value", 50)).unwrap();
//!
//! let transfer = work_fn("transfer", |payload, docs| {
//!     let amount = payload.as_integer().ok_or("amount must be an integer")?;
//!     let from = docs.get_mut(0).ok_or("missing source")?;
//!     let balance = from.get_integer("value")?;
//!     from.insert("value", balance - amount);
//!     let to = docs.get_mut(1).ok_or("missing target")?;
//!     let balance = to.get_integer("value")?;
//!     to.insert("value", balance + amount);
//!     Ok(())
//! });
//!
//! let manager = TransactionManager::new(
//!     store.clone(),
//!     Namespace::new("bank", "transactions"),
//!     TxnConfig::default(),
//! );
//! manager
//!     .run(transfer, 10, [accounts.key("a"), accounts.key("b")])
//!     .unwrap();
//!
//! let a = store.find_by_id(&accounts, &Value::from("a")).unwrap().unwrap();
//! assert_eq!(a.get_integer("value").unwrap(), 90);
//! assert!(a.get("lock").is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod docref;
mod error;
pub mod lock;
mod record;
pub mod store;
mod sweeper;
mod transaction;
mod types;
mod work;

pub use config::{LockConfig, ResumePolicy, SweeperConfig, TxnConfig};
pub use docref::DocumentRef;
pub use error::{CoreError, CoreResult, ErrorKind, WorkError};
pub use lock::{CancelHandle, LOCK_FIELD};
pub use record::{fields as record_fields, TransactionRecord, TransactionStatus};
pub use store::{
    Condition, DocumentStore, Filter, InMemoryStore, LogStore, ReturnDocument, StoreError,
    StoreResult, Update,
};
pub use sweeper::{Recovery, RecoverySweeper, SweepReport, WorkRegistry};
pub use transaction::{Transaction, TransactionManager};
pub use types::{DocumentKey, Namespace, TransactionId};
pub use work::{work_fn, FnWork, Snapshots, UnitOfWork};
