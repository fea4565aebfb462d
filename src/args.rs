//! Call-site input for query operations.
//!
//! Every client entry point accepts one [`QueryArgs`] value. The variants
//! cover the ways a call site can describe a query; [`resolve_args`] turns
//! any of them into a normalized key, an optional producer and options.

use std::fmt;

use serde::Serialize;

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::query::{Fetcher, QueryOptions};

/// How a call site describes a query.
///
/// Omitting the fetcher reuses the producer already registered for the key.
pub enum QueryArgs<K, T> {
    Key(K),
    KeyFetcher(K, Fetcher<T>),
    KeyFetcherOptions(K, Fetcher<T>, QueryOptions<T>),
    Object {
        key: K,
        fetcher: Option<Fetcher<T>>,
        options: QueryOptions<T>,
    },
}

impl<K, T> QueryArgs<K, T> {
    /// Shorthand for [`QueryArgs::KeyFetcher`].
    pub fn new(key: K, fetcher: Fetcher<T>) -> Self {
        Self::KeyFetcher(key, fetcher)
    }

    /// Attaches options, keeping the key and fetcher.
    #[must_use]
    pub fn with_options(self, options: QueryOptions<T>) -> Self {
        match self {
            Self::Key(key) => Self::Object {
                key,
                fetcher: None,
                options,
            },
            Self::KeyFetcher(key, fetcher) | Self::KeyFetcherOptions(key, fetcher, _) => {
                Self::KeyFetcherOptions(key, fetcher, options)
            }
            Self::Object { key, fetcher, .. } => Self::Object {
                key,
                fetcher,
                options,
            },
        }
    }
}

impl<K: fmt::Debug, T> fmt::Debug for QueryArgs<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Self::KeyFetcher(key, _) => f.debug_tuple("KeyFetcher").field(key).finish(),
            Self::KeyFetcherOptions(key, _, options) => f
                .debug_tuple("KeyFetcherOptions")
                .field(key)
                .field(options)
                .finish(),
            Self::Object {
                key,
                fetcher,
                options,
            } => f
                .debug_struct("Object")
                .field("key", key)
                .field("fetcher", &fetcher.is_some())
                .field("options", options)
                .finish(),
        }
    }
}

/// A resolved [`QueryArgs`].
pub struct ResolvedArgs<T> {
    pub key: QueryKey,
    pub fetcher: Option<Fetcher<T>>,
    pub options: QueryOptions<T>,
}

/// Normalizes the key of `args` and splits out the fetcher and options.
///
/// # Errors
///
/// Returns [`QueryError::InvalidKey`] if the key cannot be normalized.
pub fn resolve_args<K, T>(args: QueryArgs<K, T>) -> Result<ResolvedArgs<T>, QueryError>
where
    K: Serialize,
{
    let (key, fetcher, options) = match args {
        QueryArgs::Key(key) => (key, None, QueryOptions::default()),
        QueryArgs::KeyFetcher(key, fetcher) => (key, Some(fetcher), QueryOptions::default()),
        QueryArgs::KeyFetcherOptions(key, fetcher, options) => (key, Some(fetcher), options),
        QueryArgs::Object {
            key,
            fetcher,
            options,
        } => (key, fetcher, options),
    };
    Ok(ResolvedArgs {
        key: QueryKey::normalize(&key)?,
        fetcher,
        options,
    })
}
