use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::QueryError;
use crate::key::QueryKey;

/// Selects queries for bulk operations.
#[derive(Clone)]
pub enum QueryFilter {
    All,
    /// The query whose hash equals this key's.
    Exact(QueryKey),
    /// Queries whose key parts start with this key's parts.
    Prefix(QueryKey),
    Predicate(Arc<dyn Fn(&QueryKey) -> bool + Send + Sync>),
}

impl QueryFilter {
    /// Matches only the query whose key normalizes to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidKey`] if `key` cannot be normalized.
    pub fn exact<K: Serialize + ?Sized>(key: &K) -> Result<Self, QueryError> {
        QueryKey::normalize(key).map(Self::Exact)
    }

    /// Matches every query whose key parts start with `key`'s parts.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidKey`] if `key` cannot be normalized.
    pub fn prefix<K: Serialize + ?Sized>(key: &K) -> Result<Self, QueryError> {
        QueryKey::normalize(key).map(Self::Prefix)
    }

    /// Matches the queries for which `f` returns `true`.
    pub fn predicate(f: impl Fn(&QueryKey) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    /// Whether the query cached under `key` is selected.
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == key,
            Self::Prefix(prefix) => prefix.is_prefix_of(key),
            Self::Predicate(f) => f(key),
        }
    }
}

/// A bare key filters by prefix.
impl From<QueryKey> for QueryFilter {
    fn from(key: QueryKey) -> Self {
        Self::Prefix(key)
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Exact(key) => f.debug_tuple("Exact").field(key).finish(),
            Self::Prefix(key) => f.debug_tuple("Prefix").field(key).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefix_matches_longer_keys() {
        let filter = QueryFilter::prefix(&"todos").unwrap();
        assert!(filter.matches(&QueryKey::normalize(&json!(["todos", 1])).unwrap()));
        assert!(filter.matches(&QueryKey::normalize(&"todos").unwrap()));
        assert!(!filter.matches(&QueryKey::normalize(&"users").unwrap()));
    }

    #[test]
    fn test_exact_matches_canonical_hash() {
        let filter = QueryFilter::exact(&json!(["todo", {"b": 2, "a": 1}])).unwrap();
        let key = QueryKey::normalize(&json!(["todo", {"a": 1, "b": 2}])).unwrap();
        assert!(filter.matches(&key));
        assert!(!filter.matches(&QueryKey::normalize(&json!(["todo"])).unwrap()));
    }

    #[test]
    fn test_predicate() {
        let filter = QueryFilter::predicate(|key| key.parts().len() == 2);
        assert!(filter.matches(&QueryKey::normalize(&json!(["a", 1])).unwrap()));
        assert!(!filter.matches(&QueryKey::normalize(&"a").unwrap()));
        assert!(QueryFilter::All.matches(&QueryKey::normalize(&"a").unwrap()));
    }
}
