//! Document store persisted as an append-only log of full documents.
//!
//! ## Frame layout
//!
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────┐
//! │ len (u32 LE) │ SHA-256(body)[..8]   │ body: CBOR entry     │
//! └──────────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! An entry is `{db, collection, doc}` holding the complete document after a
//! write. Replaying the log in order and keeping the last entry per `_id`
//! rebuilds the store.
//!
//! A write becomes visible only after its frame has been appended and
//! flushed. A frame cut short by a crash can only be the last one; replay
//! drops it and truncates the log. A bad frame anywhere else is reported as
//! corruption.

use super::collections::{Collections, Validator};
use super::{DocumentStore, Filter, ReturnDocument, StoreError, StoreResult, Update};
use crate::types::Namespace;
use doctxn_codec::{from_cbor, to_cbor, Document, Value};
use doctxn_storage::{FileBackend, StorageBackend};
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

const LEN_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 8;
const HEADER_SIZE: usize = LEN_SIZE + CHECKSUM_SIZE;

const ENTRY_DB: &str = "db";
const ENTRY_COLLECTION: &str = "collection";
const ENTRY_DOC: &str = "doc";

struct LogInner {
    collections: Collections,
    backend: Box<dyn StorageBackend>,
}

impl LogInner {
    fn commit(&mut self, namespace: &Namespace, doc: Document) -> StoreResult<()> {
        let frame = encode_frame(namespace, &doc)?;
        let offset = self.backend.append(&frame)?;
        if let Err(e) = self.backend.flush() {
            // The caller sees a failed write, so replay must not see it either.
            if let Err(undo) = self.backend.truncate(offset) {
                warn!(offset, error = %undo, "could not drop unflushed log frame");
            }
            return Err(e.into());
        }
        self.collections.put(namespace, doc);
        Ok(())
    }
}

/// A durable document store backed by a [`StorageBackend`].
pub struct LogStore {
    inner: Mutex<LogInner>,
    _lock_file: Option<File>,
}

impl LogStore {
    /// Opens a store on an existing backend, replaying its contents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a frame other than the last one is
    /// damaged, or a storage error.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StoreResult<Self> {
        let collections = replay(backend.as_mut())?;
        Ok(Self {
            inner: Mutex::new(LogInner {
                collections,
                backend,
            }),
            _lock_file: None,
        })
    }

    /// Opens (or creates) a log file, taking an exclusive lock on it.
    ///
    /// The lock lives in a sibling `<path>.lock` file and is held until the
    /// store is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LogLocked`] if another process holds the lock, or
    /// any error from [`open`](Self::open).
    pub fn open_path(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::LogLocked {
                path: path.to_path_buf(),
            });
        }

        let backend = FileBackend::open(path)?;
        let mut store = Self::open(Box::new(backend))?;
        store._lock_file = Some(lock_file);
        Ok(store)
    }

    /// Installs a write validator on a collection.
    ///
    /// Validators are runtime configuration and are not persisted.
    pub fn set_validator<F>(&self, namespace: Namespace, validator: F)
    where
        F: Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    {
        let validator: Validator = Arc::new(validator);
        self.inner.lock().collections.set_validator(namespace, validator);
    }

    /// Removes a collection's validator.
    pub fn clear_validator(&self, namespace: &Namespace) {
        self.inner.lock().collections.remove_validator(namespace);
    }

    /// Number of documents in a collection.
    pub fn count(&self, namespace: &Namespace) -> usize {
        self.inner.lock().collections.len(namespace)
    }

    /// Forces the log to durable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails.
    pub fn sync(&self) -> StoreResult<()> {
        self.inner.lock().backend.sync()?;
        Ok(())
    }
}

impl DocumentStore for LogStore {
    fn find_by_id(&self, namespace: &Namespace, id: &Value) -> StoreResult<Option<Document>> {
        Ok(self.inner.lock().collections.get(namespace, id).cloned())
    }

    fn replace(
        &self,
        namespace: &Namespace,
        id: &Value,
        doc: &Document,
        upsert: bool,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        match inner.collections.plan_replace(namespace, id, doc, upsert)? {
            Some(replacement) => {
                inner.commit(namespace, replacement)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_one_and_update(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let mut inner = self.inner.lock();
        let Some((before, after)) = inner.collections.plan_update(namespace, filter, update)?
        else {
            return Ok(None);
        };
        inner.commit(namespace, after.clone())?;
        Ok(Some(match returning {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        }))
    }

    fn insert(&self, namespace: &Namespace, doc: Document) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let doc = inner.collections.plan_insert(namespace, doc)?;
        inner.commit(namespace, doc)
    }

    fn find(&self, namespace: &Namespace, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self.inner.lock().collections.find(namespace, filter))
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

fn encode_frame(namespace: &Namespace, doc: &Document) -> StoreResult<Vec<u8>> {
    let entry = Document::new()
        .with(ENTRY_DB, namespace.database())
        .with(ENTRY_COLLECTION, namespace.collection())
        .with(ENTRY_DOC, doc.clone());
    let body = to_cbor(&entry)?;
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::unavailable(format!("entry of {} bytes is too large", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(&body));
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_entry(body: &[u8]) -> StoreResult<(Namespace, Document)> {
    let entry: Document = from_cbor(body)?;
    let namespace = Namespace::new(
        entry.get_text(ENTRY_DB)?,
        entry.get_text(ENTRY_COLLECTION)?,
    );
    let doc = entry.get_document(ENTRY_DOC)?.clone();
    Ok((namespace, doc))
}

fn replay(backend: &mut dyn StorageBackend) -> StoreResult<Collections> {
    let bytes = backend.read_all()?;
    let mut collections = Collections::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }

        let mut len_bytes = [0u8; LEN_SIZE];
        len_bytes.copy_from_slice(&rest[..LEN_SIZE]);
        let frame_len = HEADER_SIZE + u32::from_le_bytes(len_bytes) as usize;
        if rest.len() < frame_len {
            break;
        }

        let body = &rest[HEADER_SIZE..frame_len];
        let is_last = offset + frame_len == bytes.len();
        if checksum(body) != rest[LEN_SIZE..HEADER_SIZE] {
            if is_last {
                break;
            }
            return Err(StoreError::corrupted(offset as u64, "checksum mismatch"));
        }

        let (namespace, doc) = decode_entry(body)
            .map_err(|e| StoreError::corrupted(offset as u64, e.to_string()))?;
        collections.put(&namespace, doc);
        offset += frame_len;
    }

    if offset < bytes.len() {
        tracing::warn!(
            offset,
            dropped = bytes.len() - offset,
            "truncating torn tail of document log"
        );
        backend.truncate(offset as u64)?;
    }
    Ok(collections)
}
