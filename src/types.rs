//! Core types shared by the cache, subscriptions and cursors.

use crate::error::{Result, ViewError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// Stable identity of a document (`_id`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

/// Position in the upstream change stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured record with a stable identity and an optional deletion marker.
///
/// Serializes flat, the way the upstream store hands documents out:
/// `{"_id": "a", "_deleted": true, ...fields}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Document {
    /// Create an empty document with the given identity.
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            deleted: false,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Parse a document from its flat JSON form. `_id` must be a string.
    pub fn from_json(value: Value) -> Result<Self> {
        match value.get("_id") {
            Some(Value::String(_)) => {}
            Some(_) => return Err(ViewError::InvalidDocument("_id must be a string".into())),
            None => return Err(ViewError::InvalidDocument("missing _id".into())),
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Flat JSON form of the document.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert("_id".into(), Value::String(self.id.0.clone()));
        if self.deleted {
            map.insert("_deleted".into(), Value::Bool(true));
        }
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// A deletion marker for this document, keeping its last known fields.
    pub fn tombstone(&self) -> Self {
        Self {
            id: self.id.clone(),
            deleted: true,
            fields: self.fields.clone(),
        }
    }

    /// Look up a dotted path (`"a.b.0"`). `_id` and `_deleted` address the
    /// identity and the deletion marker.
    pub fn get(&self, path: &str) -> Option<Cow<'_, Value>> {
        match path {
            "_id" => return Some(Cow::Owned(Value::String(self.id.0.clone()))),
            "_deleted" => return Some(Cow::Owned(Value::Bool(self.deleted))),
            _ => {}
        }

        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(Cow::Borrowed(current))
    }
}

/// One mutation from the upstream change stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub sequence: Sequence,
    pub document: Document,
    pub deleted: bool,
}

impl ChangeRecord {
    pub fn upsert(sequence: Sequence, document: Document) -> Self {
        Self {
            sequence,
            document,
            deleted: false,
        }
    }

    pub fn deletion(sequence: Sequence, document: Document) -> Self {
        Self {
            sequence,
            document: document.tombstone(),
            deleted: true,
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(0.0);
                    let y = y.as_f64().unwrap_or(0.0);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_values(l, r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                match lk.cmp(rk).then_with(|| compare_values(lv, rv)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Orderable sort key produced by a cursor's sort function.
///
/// Equality follows [`compare_values`], so `1` and `1.0` are the same key.
#[derive(Clone, Debug)]
pub struct SortKey(pub Value);

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_navigation() {
        let seq = Sequence(5);
        assert_eq!(seq.next(), Sequence(6));
    }

    #[test]
    fn test_document_flat_json() {
        let doc = Document::from_json(json!({"_id": "a", "status": "open", "n": 3})).unwrap();
        assert_eq!(doc.id, DocumentId::from("a"));
        assert!(!doc.deleted);
        assert_eq!(doc.fields["status"], "open");
        assert_eq!(doc.to_json(), json!({"_id": "a", "status": "open", "n": 3}));
    }

    #[test]
    fn test_document_requires_string_id() {
        assert!(matches!(
            Document::from_json(json!({"status": "open"})),
            Err(ViewError::InvalidDocument(_))
        ));
        assert!(matches!(
            Document::from_json(json!({"_id": 7})),
            Err(ViewError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_document_path_lookup() {
        let doc = Document::new("x")
            .with("meta", json!({"tags": ["a", "b"], "owner": {"name": "kim"}}));
        assert_eq!(doc.get("meta.owner.name").unwrap().as_ref(), &json!("kim"));
        assert_eq!(doc.get("meta.tags.1").unwrap().as_ref(), &json!("b"));
        assert_eq!(doc.get("_id").unwrap().as_ref(), &json!("x"));
        assert!(doc.get("meta.missing").is_none());
        assert!(doc.get("meta.tags.9").is_none());
    }

    #[test]
    fn test_tombstone_keeps_fields() {
        let doc = Document::new("x").with("k", 1);
        let record = ChangeRecord::deletion(Sequence(4), doc);
        assert!(record.deleted);
        assert!(record.document.deleted);
        assert_eq!(record.document.fields["k"], 1);
    }

    #[test]
    fn test_value_ordering() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
        assert_eq!(compare_values(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
        assert!(SortKey(json!(1)) < SortKey(json!(2)));
    }

    #[test]
    fn test_sort_key_equality_matches_ordering() {
        assert_eq!(SortKey(json!(1)), SortKey(json!(1.0)));
        assert_eq!(SortKey(json!(1)).cmp(&SortKey(json!(1.0))), Ordering::Equal);
        assert_ne!(SortKey(json!(1)), SortKey(json!("1")));
    }
}
