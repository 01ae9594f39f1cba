//! Cursor configuration.

use crate::reactive::ReactiveDependency;
use crate::types::{Document, SortKey};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Maps a document on its way out of a cursor.
pub type Transform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// Computes an orderable key from a document.
pub type SortFn = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// How a cursor orders its documents. Equal keys keep insertion order.
#[derive(Clone)]
pub enum Sort {
    /// Ascending by the value at a dotted path; missing sorts as null.
    Field(String),
    /// Ascending by a computed key.
    Key(SortFn),
}

impl Sort {
    pub fn field(path: impl Into<String>) -> Self {
        Sort::Field(path.into())
    }

    pub fn key<F>(f: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        Sort::Key(Arc::new(f))
    }

    pub(crate) fn key_of(&self, document: &Document) -> SortKey {
        match self {
            Sort::Field(path) => SortKey(
                document
                    .get(path)
                    .map(Cow::into_owned)
                    .unwrap_or(Value::Null),
            ),
            Sort::Key(f) => SortKey(f(document)),
        }
    }
}

impl fmt::Debug for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Field(path) => f.debug_tuple("Field").field(path).finish(),
            Sort::Key(_) => f.write_str("Key(..)"),
        }
    }
}

/// Options for a cursor.
///
/// Defaults: no sort (insertion order), no transform (identity), no
/// keepalive (snapshot only, updated by `refresh()`), no reactive dependency.
#[derive(Clone, Default)]
pub struct CursorOptions {
    pub sort: Option<Sort>,
    pub transform: Option<Transform>,
    /// Attach to the cache on construction and follow it live.
    pub keepalive: bool,
    pub dependency: Option<Arc<dyn ReactiveDependency>>,
}

impl CursorOptions {
    pub fn sorted_by(mut self, path: impl Into<String>) -> Self {
        self.sort = Some(Sort::field(path));
        self
    }

    pub fn sort_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        self.sort = Some(Sort::key(f));
        self
    }

    pub fn with_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> Document + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(f));
        self
    }

    pub fn keepalive(mut self) -> Self {
        self.keepalive = true;
        self
    }

    pub fn with_dependency(mut self, dependency: Arc<dyn ReactiveDependency>) -> Self {
        self.dependency = Some(dependency);
        self
    }
}

impl fmt::Debug for CursorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorOptions")
            .field("sort", &self.sort)
            .field("transform", &self.transform.is_some())
            .field("keepalive", &self.keepalive)
            .field("dependency", &self.dependency.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_sort_missing_is_null() {
        let sort = Sort::field("n");
        assert_eq!(sort.key_of(&Document::new("a")), SortKey(Value::Null));
        assert_eq!(sort.key_of(&Document::new("a").with("n", 3)), SortKey(json!(3)));
    }

    #[test]
    fn test_builders() {
        let options = CursorOptions::default()
            .sorted_by("n")
            .with_transform(|d| d)
            .keepalive();
        assert!(options.keepalive);
        assert!(options.transform.is_some());
        assert!(matches!(options.sort, Some(Sort::Field(ref p)) if p == "n"));
    }
}
