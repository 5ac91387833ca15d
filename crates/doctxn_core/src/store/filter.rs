//! Filters and updates understood by every document store.

use doctxn_codec::{Document, Value, ID_FIELD};
use std::cmp::Ordering;

/// A predicate on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The field is present, whatever its value (null included).
    Exists,
    /// The field is not present.
    Absent,
    /// The field is present and equal to the value.
    Eq(Value),
    /// The field is present, has the value's type and sorts before it.
    Lt(Value),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match (self, field) {
            (Condition::Exists, found) => found.is_some(),
            (Condition::Absent, found) => found.is_none(),
            (Condition::Eq(expected), Some(found)) => found == expected,
            (Condition::Lt(bound), Some(found)) => found.compare(bound) == Some(Ordering::Less),
            (Condition::Eq(_) | Condition::Lt(_), None) => false,
        }
    }
}

/// A document predicate.
///
/// Field paths use dots to reach into nested documents (`"owner.name"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Matches when the condition holds for the field at `path`.
    Field {
        /// Dotted field path.
        path: String,
        /// Condition on the field.
        condition: Condition,
    },
    /// Matches when every sub-filter matches.
    And(Vec<Filter>),
    /// Matches when at least one sub-filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    /// Creates a field filter.
    pub fn field(path: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            path: path.into(),
            condition,
        }
    }

    /// Matches the document with the given `_id`.
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::field(ID_FIELD, Condition::Eq(id.into()))
    }

    /// Conjunction of filters.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction of filters.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Field { path, condition } => condition.matches(lookup(doc, path)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }

    /// Returns the `_id` this filter pins, if any.
    ///
    /// Stores use it to answer point queries without a scan.
    pub fn pinned_id(&self) -> Option<&Value> {
        match self {
            Filter::Field {
                path,
                condition: Condition::Eq(id),
            } if path == ID_FIELD => Some(id),
            Filter::And(filters) => filters.iter().find_map(Filter::pinned_id),
            _ => None,
        }
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

/// A partial modification of top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    /// Fields to set, in order.
    pub set: Vec<(String, Value)>,
    /// Fields to remove.
    pub unset: Vec<String>,
}

impl Update {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `$set` of `field` to `value`.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    /// Adds an `$unset` of `field`.
    #[must_use]
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    /// Returns true if the update touches `_id`.
    pub fn touches_id(&self) -> bool {
        self.set.iter().any(|(field, _)| field == ID_FIELD)
            || self.unset.iter().any(|field| field == ID_FIELD)
    }

    /// Applies the update to a document in place.
    pub fn apply_to(&self, doc: &mut Document) {
        for (field, value) in &self.set {
            doc.insert(field.clone(), value.clone());
        }
        for field in &self.unset {
            doc.remove(field);
        }
    }
}
