//! # doctxn Storage
//!
//! Append-only byte storage for doctxn's durable document log.
//!
//! Backends are **opaque byte stores**: they append, read back and truncate
//! bytes without interpreting them. Framing, checksums and replay belong to
//! the log store in `doctxn_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral; clones share one buffer, which lets
//!   tests "reopen" a log after simulating a crash
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use doctxn_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
