//! Sorted, keyed document sequence backing a cursor.

use crate::types::{Document, DocumentId, SortKey};
use std::collections::{BTreeMap, HashMap};

/// Position of a row: sort key first, then arrival order among equals.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    key: Option<SortKey>,
    arrival: u64,
}

/// What an upsert did.
#[derive(Debug, PartialEq)]
pub(crate) enum Upsert {
    Inserted,
    Updated { previous: Document },
    Unchanged,
}

/// Documents ordered by key; rows without a key (unsorted cursors) keep
/// insertion order. Equal keys keep insertion order as well.
///
/// Rows live in an ordered map with an id index beside it, so lookups,
/// inserts and removals are logarithmic.
#[derive(Default)]
pub(crate) struct Subset {
    rows: BTreeMap<Slot, Document>,
    index: HashMap<DocumentId, Slot>,
    next_arrival: u64,
}

impl Subset {
    /// A slot behind every row already holding `key`.
    fn next_slot(&mut self, key: Option<SortKey>) -> Slot {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        Slot { key, arrival }
    }

    /// Insert or replace by identity. A member whose key is unchanged keeps
    /// its position; otherwise it moves behind its new equals.
    pub(crate) fn upsert(&mut self, document: Document, key: Option<SortKey>) -> Upsert {
        let previous = match self.index.get(&document.id).cloned() {
            Some(slot) => {
                if let Some(current) = self.rows.get_mut(&slot) {
                    if *current == document {
                        return Upsert::Unchanged;
                    }
                    if slot.key == key {
                        let previous = std::mem::replace(current, document);
                        return Upsert::Updated { previous };
                    }
                }
                self.rows.remove(&slot)
            }
            None => None,
        };

        let slot = self.next_slot(key);
        self.index.insert(document.id.clone(), slot.clone());
        self.rows.insert(slot, document);
        match previous {
            Some(previous) => Upsert::Updated { previous },
            None => Upsert::Inserted,
        }
    }

    pub(crate) fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        let slot = self.index.remove(id)?;
        self.rows.remove(&slot)
    }

    pub(crate) fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.index.get(id).and_then(|slot| self.rows.get(slot))
    }

    /// Empty the subset, returning how many rows were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let len = self.rows.len();
        self.rows.clear();
        self.index.clear();
        len
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn documents(&self) -> impl Iterator<Item = &Document> {
        self.rows.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(n: i64) -> Option<SortKey> {
        Some(SortKey(json!(n)))
    }

    fn ids(subset: &Subset) -> Vec<String> {
        subset.documents().map(|d| d.id.0.clone()).collect()
    }

    #[test]
    fn test_unsorted_keeps_insertion_order() {
        let mut subset = Subset::default();
        for id in ["c", "a", "b"] {
            assert_eq!(subset.upsert(Document::new(id), None), Upsert::Inserted);
        }
        assert_eq!(ids(&subset), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_sorted_ties_are_stable() {
        let mut subset = Subset::default();
        subset.upsert(Document::new("x"), key(2));
        subset.upsert(Document::new("y"), key(1));
        subset.upsert(Document::new("z"), key(2));
        subset.upsert(Document::new("w"), key(1));
        assert_eq!(ids(&subset), vec!["y", "w", "x", "z"]);
    }

    #[test]
    fn test_update_in_place_and_reorder() {
        let mut subset = Subset::default();
        subset.upsert(Document::new("a").with("n", 1), key(1));
        subset.upsert(Document::new("b").with("n", 2), key(2));
        subset.upsert(Document::new("c").with("n", 3), key(3));

        // Same key, new content: stays put.
        let outcome = subset.upsert(Document::new("a").with("n", 1).with("t", "x"), key(1));
        assert!(matches!(outcome, Upsert::Updated { .. }));
        assert_eq!(ids(&subset), vec!["a", "b", "c"]);

        // New key: moves behind its equals.
        subset.upsert(Document::new("a").with("n", 3), key(3));
        assert_eq!(ids(&subset), vec!["b", "c", "a"]);

        assert_eq!(
            subset.upsert(Document::new("a").with("n", 3), key(3)),
            Upsert::Unchanged
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let mut subset = Subset::default();
        subset.upsert(Document::new("a"), None);
        subset.upsert(Document::new("b"), None);

        assert_eq!(subset.remove(&"a".into()).map(|d| d.id.0), Some("a".to_string()));
        assert!(subset.remove(&"a".into()).is_none());
        assert!(subset.get(&"b".into()).is_some());
        assert_eq!(subset.clear(), 1);
        assert_eq!(subset.len(), 0);
        assert!(subset.get(&"b".into()).is_none());
    }

    #[test]
    fn test_numerically_equal_key_updates_in_place() {
        let mut subset = Subset::default();
        subset.upsert(Document::new("a").with("n", 1), key(1));
        subset.upsert(Document::new("b").with("n", 1), key(1));

        let float_key = Some(SortKey(json!(1.0)));
        let outcome = subset.upsert(Document::new("a").with("n", 1.0), float_key);
        assert!(matches!(outcome, Upsert::Updated { .. }));
        assert_eq!(ids(&subset), vec!["a", "b"]);
        assert_eq!(subset.len(), 2);
    }

    #[test]
    fn test_lookup_after_reorder() {
        let mut subset = Subset::default();
        for n in 0..50 {
            subset.upsert(Document::new(format!("d{n}")), key(n % 7));
        }
        subset.upsert(Document::new("d3").with("moved", true), key(100));

        let moved = subset.get(&"d3".into()).unwrap();
        assert_eq!(moved.get("moved").unwrap().as_bool(), Some(true));
        assert_eq!(subset.documents().last().map(|d| d.id.0.as_str()), Some("d3"));
        assert_eq!(subset.len(), 50);
    }
}
