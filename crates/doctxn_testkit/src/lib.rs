//! # doctxn Testkit
//!
//! Test utilities for doctxn.
//!
//! This crate provides:
//! - Store fixtures, JSON seed documents and a test tracing subscriber
//! - A fault-injecting store wrapper for crash simulation
//! - Sample units of work (bank transfers)
//! - Property-based test generators using proptest
//! - Crash recovery and concurrency stress harnesses
//!
//! ## Usage
//!
//! ```rust
//! use doctxn_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! seed_accounts(&*store, &[("a", 100), ("b", 50)]);
//! let manager = manager(store.shared());
//! manager
//!     .run(transfer(), 10, [accounts().key("a"), accounts().key("b")])
//!     .unwrap();
//! assert_eq!(balance(&*store, "a"), 90);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod work;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::work::*;
}

pub use crash::*;
pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use work::*;
