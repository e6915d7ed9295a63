//! Schema-less documents, filters and updates
//!
//! Typed records are serialized into [`Document`]s at the storage boundary.
//! Filters and updates address fields by dotted path (`payload.focus`), so a
//! partial update can touch one nested key without rewriting its siblings.

use crate::error::{MemoryError, MemoryResult};
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document
pub type Document = Map<String, Value>;

/// Primary key field present on every document
pub const ID_FIELD: &str = "_id";

/// TTL marker: microseconds since the epoch after which the document is gone
pub const EXPIRY_FIELD: &str = "expires_at";

/// Serialize a typed record into a document
pub fn to_document<T: Serialize>(record: &T, context: &str) -> MemoryResult<Document> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            let error = <serde_json::Error as serde::ser::Error>::custom(
                "record did not serialize to an object",
            );
            Err(MemoryError::serialization(context, error))
        }
        Err(e) => Err(MemoryError::serialization(context, e)),
    }
}

/// Deserialize a document into a typed record
pub fn from_document<T: DeserializeOwned>(document: Document, context: &str) -> MemoryResult<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| MemoryError::serialization(context, e))
}

/// Read a field by dotted path
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a field by dotted path, creating intermediate objects
pub fn set_path(document: &mut Document, path: &str, value: Value) {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = document;
    if let Some(parents) = parents {
        for part in parents.split('.') {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
    }
    current.insert(last.to_string(), value);
}

/// Current time at the precision timestamps are stored with
pub fn current_time() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp encoding used for every stored time field
pub fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::from(at.timestamp_micros())
}

/// Expiry marker of a document, if any
pub fn expiry_of(document: &Document) -> Option<i64> {
    document.get(EXPIRY_FIELD).and_then(Value::as_i64)
}

/// Whether a document is past its TTL marker
pub fn is_expired(document: &Document, now_micros: i64) -> bool {
    expiry_of(document).is_some_and(|at| at <= now_micros)
}

/// Join key segments with `::`, escaping `%` and `:` inside each segment
///
/// Distinct segment lists always give distinct keys, whatever the
/// segments contain.
pub fn compose_key(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| segment.replace('%', "%25").replace(':', "%3A"))
        .collect::<Vec<_>>()
        .join("::")
}

/// Document id as a string
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A single field condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value (a missing field equals `null`)
    Eq(Value),
    /// Field differs from value; missing fields match
    Ne(Value),
    /// Field equals one of the values
    In(Vec<Value>),
    /// Field greater than value
    Gt(Value),
    /// Field greater than or equal to value
    Gte(Value),
    /// Field less than value
    Lt(Value),
    /// Field less than or equal to value
    Lte(Value),
    /// Field presence
    Exists(bool),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        let ordered = |expected: &Value, accept: fn(Ordering) -> bool| {
            field
                .and_then(|f| compare_values(f, expected))
                .is_some_and(accept)
        };

        match self {
            Condition::Eq(expected) => match field {
                Some(value) => values_equal(value, expected),
                None => expected.is_null(),
            },
            Condition::Ne(expected) => match field {
                Some(value) => !values_equal(value, expected),
                None => !expected.is_null(),
            },
            Condition::In(options) => {
                field.is_some_and(|value| options.iter().any(|o| values_equal(value, o)))
            }
            Condition::Gt(expected) => ordered(expected, |o| o == Ordering::Greater),
            Condition::Gte(expected) => ordered(expected, |o| o != Ordering::Less),
            Condition::Lt(expected) => ordered(expected, |o| o == Ordering::Less),
            Condition::Lte(expected) => ordered(expected, |o| o != Ordering::Greater),
            Condition::Exists(expected) => field.is_some() == *expected,
        }
    }
}

/// Conjunction of field conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    /// Match every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a single document by id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_FIELD, id.into())
    }

    /// Add a condition
    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((field.into(), condition));
        self
    }

    /// Field equals value
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    /// Field differs from value (missing fields match)
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    /// Field is one of the values
    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.with(field, Condition::In(values))
    }

    /// Field greater than value
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gt(value.into()))
    }

    /// Field greater than or equal to value
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Gte(value.into()))
    }

    /// Field less than value
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lt(value.into()))
    }

    /// Field less than or equal to value
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Lte(value.into()))
    }

    /// Field presence
    pub fn exists(self, field: impl Into<String>, present: bool) -> Self {
        self.with(field, Condition::Exists(present))
    }

    /// Conditions in insertion order
    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    /// Whether the document satisfies every condition
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(get_path(document, field)))
    }

    /// Equality conditions, used to seed documents created by an upsert
    pub fn equality_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.clauses.iter().filter_map(|(field, condition)| match condition {
            Condition::Eq(value) => Some((field.as_str(), value)),
            _ => None,
        })
    }

    /// Id pinned by an equality condition, if any
    pub fn pinned_id(&self) -> Option<&str> {
        self.equality_fields()
            .find(|(field, _)| *field == ID_FIELD)
            .and_then(|(_, value)| value.as_str())
    }
}

/// Field-level modifications applied atomically to one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Value)>,
    set_on_insert: Vec<(String, Value)>,
    inc: Vec<(String, i64)>,
    push: Vec<(String, Value)>,
}

impl Update {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field (dotted paths create intermediate objects)
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((field.into(), value.into()));
        self
    }

    /// Set a field only when the upsert creates the document
    pub fn set_on_insert(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_on_insert.push((field.into(), value.into()));
        self
    }

    /// Add to an integer field (missing fields start at zero)
    pub fn inc(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.inc.push((field.into(), delta));
        self
    }

    /// Append to an array field
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push.push((field.into(), value.into()));
        self
    }

    /// Set the TTL marker
    pub fn expire_at(self, at: DateTime<Utc>) -> Self {
        self.set(EXPIRY_FIELD, timestamp_value(at))
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.set_on_insert.is_empty()
            && self.inc.is_empty()
            && self.push.is_empty()
    }

    /// Apply to an existing document (or to a freshly seeded one when `inserting`)
    pub fn apply(&self, document: &mut Document, inserting: bool) {
        if inserting {
            for (field, value) in &self.set_on_insert {
                set_path(document, field, value.clone());
            }
        }
        for (field, value) in &self.set {
            set_path(document, field, value.clone());
        }
        for (field, delta) in &self.inc {
            let current = get_path(document, field).and_then(Value::as_i64).unwrap_or(0);
            set_path(document, field, Value::from(current + delta));
        }
        for (field, value) in &self.push {
            let mut items = match get_path(document, field) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            items.push(value.clone());
            set_path(document, field, Value::Array(items));
        }
    }

    /// Build the document an upsert inserts when nothing matched
    pub fn materialize(&self, filter: &Filter) -> Document {
        let mut document = Document::new();
        for (field, value) in filter.equality_fields() {
            set_path(&mut document, field, value.clone());
        }
        self.apply(&mut document, true);
        if document_id(&document).is_none() {
            document.insert(
                ID_FIELD.to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        document
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One sort key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// Sorting and paging for `find_many`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
}

impl FindOptions {
    /// No sorting, no limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort ascending by field
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order: SortOrder::Ascending,
        });
        self
    }

    /// Sort descending by field
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order: SortOrder::Descending,
        });
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Stable sort then truncate; equal keys keep their incoming order
pub fn apply_find_options(documents: &mut Vec<Document>, options: &FindOptions) {
    if !options.sort.is_empty() {
        documents.sort_by(|a, b| {
            options
                .sort
                .iter()
                .map(|key| {
                    let ordering = compare_fields(get_path(a, &key.field), get_path(b, &key.field));
                    match key.order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
    if let Some(limit) = options.limit {
        documents.truncate(limit);
    }
}
