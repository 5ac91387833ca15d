//! Per-document advisory locks built on conditional updates.
//!
//! A participant is locked while its `lock` field holds a timestamp. The
//! field is free when absent or `null`; `null` is what a stale-lock breaker
//! leaves behind. Acquisition is a single `find_one_and_update` that only
//! matches a free document, so at most one transaction can win it.
//!
//! A holder that dies leaves its timestamp behind. Once that timestamp is
//! older than [`LockConfig::max_lock_age`] any contender may break the lock,
//! again conditionally on the exact timestamp it observed, so only one
//! breaker succeeds. Breaking never acquires: the breaker competes for the
//! lock like everyone else.

use crate::config::LockConfig;
use crate::docref::DocumentRef;
use crate::error::{CoreError, CoreResult};
use crate::store::{Condition, DocumentStore, Filter, ReturnDocument, Update};
use crate::types::DocumentKey;
use doctxn_codec::{Timestamp, Value};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Name of the lock marker field on participant documents.
pub const LOCK_FIELD: &str = "lock";

/// Shared flag that interrupts lock acquisition.
///
/// Clones observe the same flag, so a handle taken from a transaction can be
/// cancelled from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What a contender learned by re-reading a locked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// The lock is free (or was just broken); retry at once.
    Free,
    /// Someone holds a live lock; back off.
    Held,
}

/// Filter matching the document only while its lock is free.
pub fn free_filter(id: &Value) -> Filter {
    Filter::and([
        Filter::by_id(id.clone()),
        Filter::or([
            Filter::field(LOCK_FIELD, Condition::Absent),
            Filter::field(LOCK_FIELD, Condition::Eq(Value::Null)),
        ]),
    ])
}

/// Filter matching the document only while its lock marker is exactly `since`.
fn held_since(id: &Value, since: Timestamp) -> Filter {
    Filter::and([
        Filter::by_id(id.clone()),
        Filter::field(LOCK_FIELD, Condition::Eq(Value::Timestamp(since))),
    ])
}

/// Acquires the participant's lock, caching the locked read as its snapshot.
///
/// Retries until the lock is won, the configured deadline passes, or `cancel`
/// fires.
///
/// # Errors
///
/// Returns [`CoreError::NotFound`] if the document does not exist,
/// [`CoreError::LockTimeout`], [`CoreError::LockInterrupted`], or a store
/// error.
pub fn acquire(
    store: &dyn DocumentStore,
    doc_ref: &mut DocumentRef,
    config: &LockConfig,
    cancel: &CancelHandle,
) -> CoreResult<()> {
    let key = doc_ref.key().clone();
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::LockInterrupted { key });
        }

        attempts += 1;
        let now = Timestamp::now();
        let locked = store.find_one_and_update(
            key.namespace(),
            &free_filter(key.id()),
            &Update::new().set(LOCK_FIELD, now),
            ReturnDocument::After,
        )?;
        if let Some(doc) = locked {
            debug!(key = %key, attempts, "lock acquired");
            doc_ref.set_snapshot(doc);
            doc_ref.set_lock_held(true);
            return Ok(());
        }

        if probe(store, &key, config)? == Probe::Free {
            continue;
        }

        let delay = jittered(config.backoff);
        let delay = match config.timeout {
            Some(timeout) => {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(CoreError::LockTimeout { key, waited });
                }
                delay.min(timeout - waited)
            }
            None => delay,
        };
        trace!(key = %key, attempts, ?delay, "lock busy, backing off");
        thread::sleep(delay);
    }
}

/// Removes the participant's lock marker. Idempotent.
///
/// # Errors
///
/// Returns a store error if the update fails; the handle then still reports
/// the lock as held.
pub fn release(store: &dyn DocumentStore, doc_ref: &mut DocumentRef) -> CoreResult<()> {
    let key = doc_ref.key();
    store.find_one_and_update(
        key.namespace(),
        &Filter::by_id(key.id().clone()),
        &Update::new().unset(LOCK_FIELD),
        ReturnDocument::After,
    )?;
    debug!(key = %key, "lock released");
    doc_ref.set_lock_held(false);
    Ok(())
}

/// Takes over a lock left behind by a holder that stopped while its marker
/// read `since`, refreshing the marker to now.
///
/// Returns `false` without touching the document when the marker changed in
/// the meantime: the lock was broken and possibly re-acquired, so the
/// document may carry another transaction's work.
///
/// # Errors
///
/// Returns a store error.
pub fn reclaim(
    store: &dyn DocumentStore,
    doc_ref: &mut DocumentRef,
    since: Timestamp,
) -> CoreResult<bool> {
    let key = doc_ref.key().clone();
    let held = store.find_one_and_update(
        key.namespace(),
        &held_since(key.id(), since),
        &Update::new().set(LOCK_FIELD, Timestamp::now()),
        ReturnDocument::After,
    )?;
    match held {
        Some(doc) => {
            debug!(key = %key, %since, "lock reclaimed");
            doc_ref.set_snapshot(doc);
            doc_ref.set_lock_held(true);
            Ok(true)
        }
        None => {
            warn!(key = %key, %since, "inherited lock was broken");
            doc_ref.set_lock_held(false);
            Ok(false)
        }
    }
}

/// Re-reads a document after a failed acquisition and breaks its lock if
/// the holder has been silent for longer than `max_lock_age`.
fn probe(store: &dyn DocumentStore, key: &DocumentKey, config: &LockConfig) -> CoreResult<Probe> {
    let doc = store
        .find_by_id(key.namespace(), key.id())?
        .ok_or_else(|| CoreError::not_found(key.clone()))?;

    let since = match doc.get(LOCK_FIELD) {
        None | Some(Value::Null) => return Ok(Probe::Free),
        Some(Value::Timestamp(since)) => *since,
        Some(other) => {
            warn!(
                key = %key,
                found = other.type_name(),
                "lock field holds a non-timestamp value; not breaking it"
            );
            return Ok(Probe::Held);
        }
    };

    let age = since.age_at(Timestamp::now());
    if age <= config.max_lock_age {
        return Ok(Probe::Held);
    }

    let broken = store.find_one_and_update(
        key.namespace(),
        &held_since(key.id(), since),
        &Update::new().set(LOCK_FIELD, Value::Null),
        ReturnDocument::After,
    )?;
    if broken.is_some() {
        warn!(key = %key, %since, ?age, "broke stale lock");
    }
    // Either we broke it or somebody else changed the lock meanwhile.
    Ok(Probe::Free)
}

/// Scales `base` by a factor drawn uniformly from `[0.9, 1.1)`.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..1.1);
    base.mul_f64(factor)
}
