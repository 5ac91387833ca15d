//! Persisted transaction records.

use crate::error::{CoreError, CoreResult};
use crate::types::{DocumentKey, TransactionId};
use doctxn_codec::{Document, Timestamp, Value};
use std::fmt;

/// Field names of the persisted record.
pub mod fields {
    /// Lifecycle status.
    pub const STATUS: &str = "status";
    /// Time of the last transition or lease.
    pub const TS: &str = "ts";
    /// Kind of the unit of work.
    pub const KIND: &str = "kind";
    /// Caller payload.
    pub const PAYLOAD: &str = "payload";
    /// Participant addresses.
    pub const PARTICIPANTS: &str = "participants";
    /// Pre-image snapshots, aligned with `participants`.
    pub const BACKUP: &str = "backup";
}

/// Lifecycle status of a transaction.
///
/// Status only moves forward:
///
/// ```text
/// Initial ──► Pending ──► Applied
///    │           │
///    └───────────┴──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Created; nothing locked or mutated yet.
    Initial,
    /// Locks held and backup persisted; participants may be partially written.
    Pending,
    /// Every participant was written. Terminal.
    Applied,
    /// Aborted or rolled back. Terminal.
    Cancelled,
}

impl TransactionStatus {
    /// Returns the persisted name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a persisted name.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "initial" => Some(Self::Initial),
            "pending" => Some(Self::Pending),
            "applied" => Some(Self::Applied),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true for `Applied` and `Cancelled`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Cancelled)
    }

    /// Returns true if `self → next` is an allowed transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initial, Self::Pending)
                | (Self::Initial, Self::Cancelled)
                | (Self::Pending, Self::Applied)
                | (Self::Pending, Self::Cancelled)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TransactionStatus> for Value {
    fn from(status: TransactionStatus) -> Self {
        Value::from(status.as_str())
    }
}

/// The durable intent log entry of one transaction.
///
/// A record alone is enough to reconstruct its transaction: it names the unit
/// of work, carries its payload and lists the participants. Once `pending`,
/// it also holds the backup used to roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    id: TransactionId,
    status: TransactionStatus,
    ts: Timestamp,
    kind: String,
    payload: Value,
    participants: Vec<DocumentKey>,
    backup: Vec<Document>,
}

impl TransactionRecord {
    pub(crate) fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: TransactionId::new(),
            status: TransactionStatus::Initial,
            ts: Timestamp::now(),
            kind: kind.into(),
            payload,
            participants: Vec::new(),
            backup: Vec::new(),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the status.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Returns the timestamp of the last transition or lease.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Returns the unit-of-work kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the caller payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the participant addresses in registration order.
    pub fn participants(&self) -> &[DocumentKey] {
        &self.participants
    }

    /// Returns the backup snapshots (empty before `pending`).
    pub fn backup(&self) -> &[Document] {
        &self.backup
    }

    pub(crate) fn push_participant(&mut self, key: DocumentKey) {
        self.participants.push(key);
    }

    pub(crate) fn set_backup(&mut self, backup: Vec<Document>) {
        self.backup = backup;
    }

    pub(crate) fn clear_backup(&mut self) {
        self.backup.clear();
    }

    pub(crate) fn set_status(&mut self, status: TransactionStatus, ts: Timestamp) {
        self.status = status;
        self.ts = ts;
    }

    /// Encodes the record for storage.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::with_id(self.id.to_value())
            .with(fields::STATUS, self.status)
            .with(fields::TS, self.ts)
            .with(fields::KIND, self.kind.as_str())
            .with(fields::PAYLOAD, self.payload.clone())
            .with(
                fields::PARTICIPANTS,
                self.participants
                    .iter()
                    .map(|key| Value::from(key.to_document()))
                    .collect::<Vec<_>>(),
            );
        if !self.backup.is_empty() {
            doc.insert(
                fields::BACKUP,
                self.backup
                    .iter()
                    .cloned()
                    .map(Value::from)
                    .collect::<Vec<_>>(),
            );
        }
        doc
    }

    /// Decodes a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptRecord`] if a field is missing or invalid,
    /// or if a non-empty backup does not line up with the participants.
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let corrupt = |e: doctxn_codec::CodecError| CoreError::corrupt_record(e.to_string());

        let id_text = doc
            .id()
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::corrupt_record("record _id is not text"))?;
        let id = TransactionId::parse(id_text)
            .map_err(|e| CoreError::corrupt_record(format!("record _id: {e}")))?;

        let status_text = doc.get_text(fields::STATUS).map_err(corrupt)?;
        let status = TransactionStatus::parse(status_text)
            .ok_or_else(|| CoreError::corrupt_record(format!("unknown status `{status_text}`")))?;

        let participants = doc
            .get_array(fields::PARTICIPANTS)
            .map_err(corrupt)?
            .iter()
            .map(|entry| {
                entry
                    .as_document()
                    .ok_or_else(|| CoreError::corrupt_record("participant is not a document"))
                    .and_then(|d| DocumentKey::from_document(d).map_err(corrupt))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let backup = match doc.get(fields::BACKUP) {
            None => Vec::new(),
            Some(_) => doc
                .get_array(fields::BACKUP)
                .map_err(corrupt)?
                .iter()
                .map(|entry| {
                    entry
                        .as_document()
                        .cloned()
                        .ok_or_else(|| CoreError::corrupt_record("backup entry is not a document"))
                })
                .collect::<CoreResult<Vec<_>>>()?,
        };
        if !backup.is_empty() && backup.len() != participants.len() {
            return Err(CoreError::corrupt_record(format!(
                "{} backup snapshots for {} participants",
                backup.len(),
                participants.len()
            )));
        }

        Ok(Self {
            id,
            status,
            ts: doc.get_timestamp(fields::TS).map_err(corrupt)?,
            kind: doc.get_text(fields::KIND).map_err(corrupt)?.to_string(),
            payload: doc.get(fields::PAYLOAD).cloned().unwrap_or(Value::Null),
            participants,
            backup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Namespace;

    fn sample() -> TransactionRecord {
        let ns = Namespace::new("bank", "accounts");
        let mut record = TransactionRecord::new("transfer", Value::from(10));
        record.push_participant(ns.key(1));
        record.push_participant(ns.key(2));
        record
    }

    #[test]
    fn transitions_only_move_forward() {
        use TransactionStatus::*;
        assert!(Initial.can_transition_to(Pending));
        assert!(Initial.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Applied));
        assert!(!Applied.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Initial));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(Applied.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn initial_record_has_no_backup_field() {
        let record = sample();
        let doc = record.to_document();
        assert_eq!(doc.get_text(fields::STATUS).unwrap(), "initial");
        assert_eq!(doc.get_text("_id").unwrap(), record.id().to_string());
        assert!(!doc.contains_key(fields::BACKUP));
        assert_eq!(TransactionRecord::from_document(&doc).unwrap(), record);
    }

    #[test]
    fn pending_record_keeps_backup_order() {
        let mut record = sample();
        record.set_backup(vec![
            Document::with_id(1).with("value", 100),
            Document::with_id(2).with("value", 50),
        ]);
        record.set_status(TransactionStatus::Pending, Timestamp::from_millis(42));

        let decoded = TransactionRecord::from_document(&record.to_document()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.backup()[1].get_integer("value").unwrap(), 50);
    }

    #[test]
    fn misaligned_backup_is_corrupt() {
        let mut doc = sample().to_document();
        doc.insert(fields::BACKUP, vec![Value::from(Document::with_id(1))]);
        assert!(matches!(
            TransactionRecord::from_document(&doc),
            Err(CoreError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let doc = sample().to_document().with(fields::STATUS, "committed");
        assert!(matches!(
            TransactionRecord::from_document(&doc),
            Err(CoreError::CorruptRecord { .. })
        ));
    }
}
