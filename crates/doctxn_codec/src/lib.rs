//! # doctxn Codec
//!
//! Document value model and CBOR encoding for doctxn.
//!
//! Documents are trees of [`Value`]s keyed by field name. The tree is fully
//! owned, so `Clone` is a structural deep copy: cloning a [`Document`] never
//! shares nested maps or arrays with the original. The transaction
//! coordinator relies on this for its backup snapshots.
//!
//! ## Usage
//!
//! ```
//! use doctxn_codec::{from_cbor, to_cbor, Document, Value};
//!
//! let doc = Document::with_id(1).with("value", 100).with("tags", vec![Value::from("a")]);
//! let bytes = to_cbor(&doc).unwrap();
//! let decoded: Document = from_cbor(&bytes).unwrap();
//! assert_eq!(doc, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod document;
mod error;
mod timestamp;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use document::{Document, ID_FIELD};
pub use error::{CodecError, CodecResult};
pub use timestamp::Timestamp;
pub use value::Value;
