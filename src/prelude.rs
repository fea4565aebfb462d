//! Prelude module for convenient imports.
//!
//! ```
//! use refetch::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] and [`QueryFilter`] - The cache
//! - [`QueryArgs`] - Call-site input
//! - [`QueryOptions`], [`QueryConfig`], [`QueryOverrides`] - Configuration
//! - [`QueryState`], [`QueryStatus`], [`Observer`] - Reading query state
//! - [`Mutation`] and its options - Writes
//! - [`QueryError`] - The error type

pub use crate::args::QueryArgs;
pub use crate::client::{QueryClient, QueryFilter};
pub use crate::config::{MutationConfig, QueryConfig, QueryOverrides, Retry, RetryDelay};
pub use crate::error::QueryError;
pub use crate::key::QueryKey;
pub use crate::mutation::{MutateOptions, Mutation, MutationOptions, MutationState, mutation_fn};
pub use crate::query::{
    FetchContext, FetchHandle, Fetcher, Observer, PaginatedQuery, Query, QueryOptions, QueryState,
    QueryStatus, QueryStream, query_fn,
};
