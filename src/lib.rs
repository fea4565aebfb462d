//! # Refetch - an async query cache
//!
//! Refetch caches the results of asynchronous producers by key, in the
//! manner of SWR or TanStack Query, on top of [tokio](https://tokio.rs/).
//!
//! ## Architecture
//!
//! 1. **Key**: any serializable value, normalized into a canonical hash
//! 2. **Query**: one state machine per key that fetches, retries, goes stale
//!    and notifies its observers
//! 3. **Client**: the cache mapping keys to queries, with garbage collection,
//!    invalidation and prefetching
//! 4. **Observer**: a subscription that keeps a query alive and refetches it
//!    on mount, window focus or an interval
//! 5. **Mutation**: a one-off write with optimistic updates and ordered
//!    callbacks
//!
//! ## Core Components
//!
//! - [`QueryClient`](client::QueryClient): The cache and its entry points
//! - [`Query`](query::Query): Per-key fetch lifecycle and state
//! - [`Observer`](query::Observer): A live subscription to a query
//! - [`Mutation`](mutation::Mutation): Writes with latest-call-wins state
//! - [`QueryConfig`](config::QueryConfig): Layered defaults
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use refetch::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueryError> {
//! let client = QueryClient::new();
//!
//! let todos = query_fn(|ctx: FetchContext| async move {
//!     // ctx.args holds the key parts: ["todos", 1]
//!     Ok(vec![format!("todo {}", ctx.args[1])])
//! });
//! let options = QueryOptions::new().stale_time(Some(Duration::from_secs(30)));
//!
//! let observer = client.observe(QueryArgs::KeyFetcherOptions(("todos", 1), todos, options))?;
//! observer.refetch().await;
//! assert_eq!(observer.state().data(), Some(&vec!["todo 1".to_string()]));
//!
//! // Mark everything under "todos" stale and refetch what is observed.
//! client.invalidate(&QueryFilter::prefix(&"todos")?);
//! # Ok(())
//! # }
//! ```
//!
//! Everything runs on tokio: queries spawn their fetches and timers, so the
//! client must be used from within a runtime.

pub mod args;
pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod mutation;
pub mod prelude;
pub mod query;

mod timer;
