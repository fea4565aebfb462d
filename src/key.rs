//! Query key normalization.
//!
//! Any [`Serialize`] value can describe a query. It is normalized into a
//! [`QueryKey`]: an ordered list of JSON parts plus a stable hash string.
//! Scalars are wrapped in a single-element list, so `"todos"` and
//! `["todos"]` identify the same query. Object properties are sorted at
//! every nesting level while array order is preserved.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::QueryError;

/// A normalized query key.
///
/// Two keys are equal iff their hashes are equal.
#[derive(Debug, Clone)]
pub struct QueryKey {
    hash: String,
    parts: Vec<Value>,
}

impl QueryKey {
    /// Normalizes a raw key description.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidKey`] if the key is `null` or cannot be
    /// represented as JSON (for example a map with non-string keys).
    ///
    /// # Example
    ///
    /// ```
    /// use refetch::key::QueryKey;
    ///
    /// let a = QueryKey::normalize(&"todos").unwrap();
    /// let b = QueryKey::normalize(&["todos"]).unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.hash(), r#"["todos"]"#);
    /// ```
    pub fn normalize<K>(raw: &K) -> Result<Self, QueryError>
    where
        K: Serialize + ?Sized,
    {
        let value = serde_json::to_value(raw).map_err(|e| QueryError::InvalidKey(e.to_string()))?;

        let parts = match value {
            Value::Null => {
                return Err(QueryError::InvalidKey("key must not be null".to_string()));
            }
            Value::Array(items) => items,
            scalar => vec![scalar],
        };

        let canonical = Value::Array(parts.into_iter().map(canonicalize).collect());
        let hash =
            serde_json::to_string(&canonical).map_err(|e| QueryError::InvalidKey(e.to_string()))?;

        // The parts handed to producers are what the hash parses back into.
        let parts = match serde_json::from_str::<Value>(&hash) {
            Ok(Value::Array(parts)) => parts,
            Ok(other) => {
                return Err(QueryError::InvalidKey(format!(
                    "expected a list of key parts, got {other}"
                )));
            }
            Err(e) => return Err(QueryError::InvalidKey(e.to_string())),
        };

        Ok(Self { hash, parts })
    }

    /// The stable hash identifying this key in the cache.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The normalized key parts.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Returns `true` if this key's parts are a leading prefix of `other`'s.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.parts.len() <= other.parts.len()
            && self.parts.iter().zip(&other.parts).all(|(a, b)| a == b)
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// Rebuilds objects with their properties in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        other => other,
    }
}
