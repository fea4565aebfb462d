//! The query cache.
//!
//! A [`QueryClient`] owns the registry that maps key hashes to queries. It
//! creates a query the first time a key is used and hands out the same
//! query for every later use of an equal key, whatever its data type was
//! declared as at the first call site. Cloning a client, or deriving a
//! scope from it, shares the registry.
//!
//! Queries without observers are evicted after their `cache_time`. When the
//! last client handle is dropped, or [`QueryClient::clear`] is called, every
//! query is torn down and all of its timers are cancelled.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), refetch::error::QueryError> {
//! use refetch::args::QueryArgs;
//! use refetch::client::{QueryClient, QueryFilter};
//! use refetch::query::query_fn;
//!
//! let client = QueryClient::new();
//! let todos = client.observe(QueryArgs::new(
//!     ("todos", 1),
//!     query_fn(|ctx| async move { Ok(format!("todo {}", ctx.args[1])) }),
//! ))?;
//! todos.refetch().await;
//!
//! client.invalidate(&QueryFilter::prefix(&"todos")?);
//! # Ok(())
//! # }
//! ```

mod entry;
mod filter;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::args::{QueryArgs, ResolvedArgs, resolve_args};
use crate::config::{MutationConfig, QueryConfig, QueryOverrides};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::mutation::{Mutation, MutationOptions, Mutator};
use crate::query::{
    Callbacks, FetchHandle, Fetcher, Listener, Observer, Query, QueryOptions, QueryState,
    QueryStream,
};

pub(crate) use entry::{CachedQuery, Registry};
pub use filter::QueryFilter;

/// Handle to a query cache.
#[derive(Clone)]
pub struct QueryClient {
    registry: Arc<Registry>,
    config: Arc<QueryConfig>,
    mutation_config: MutationConfig,
}

impl QueryClient {
    /// Creates a client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a client whose queries default to `config`.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config: Arc::new(config),
            mutation_config: MutationConfig::default(),
        }
    }

    /// Defaults for mutations created through [`QueryClient::mutation`].
    #[must_use]
    pub fn with_mutation_config(mut self, config: MutationConfig) -> Self {
        self.mutation_config = config;
        self
    }

    /// A client sharing this client's cache whose defaults are layered with
    /// `overrides`. Scopes nest.
    #[must_use]
    pub fn scoped(&self, overrides: &QueryOverrides) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::new(self.config.merge(overrides)),
            mutation_config: self.mutation_config,
        }
    }

    /// The resolved query defaults of this scope.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn mutation_config(&self) -> MutationConfig {
        self.mutation_config
    }

    fn find_or_insert<T>(
        &self,
        key: &QueryKey,
        config: &QueryConfig,
        options: &QueryOptions<T>,
        fetcher: &Option<Fetcher<T>>,
    ) -> Result<(Arc<Query<T>>, bool), QueryError>
    where
        T: Send + Sync + 'static,
    {
        let mut created = false;
        let entry = {
            let slot = self
                .registry
                .queries
                .entry(key.hash().to_owned())
                .or_insert_with(|| {
                    created = true;
                    let query: Arc<dyn CachedQuery> = Query::new(
                        key.clone(),
                        config.clone(),
                        options.clone(),
                        fetcher.clone(),
                        Arc::downgrade(&self.registry),
                    );
                    query
                });
            Arc::clone(slot.value())
        };

        let query = entry
            .into_any()
            .downcast::<Query<T>>()
            .map_err(|_| QueryError::TypeMismatch {
                key: key.hash().to_owned(),
            })?;

        if created {
            debug!(key = %key, "query created");
            query.schedule_gc_if_unobserved();
        }
        Ok((query, created))
    }

    /// Returns the query for `key`, creating it on first use, and applies the
    /// call site's configuration to it.
    pub(crate) fn get_or_create<T>(
        &self,
        key: &QueryKey,
        fetcher: Option<Fetcher<T>>,
        options: &QueryOptions<T>,
    ) -> Result<(Arc<Query<T>>, QueryConfig), QueryError>
    where
        T: Send + Sync + 'static,
    {
        let config = self.config.merge(&options.overrides);
        let (query, created) = self.find_or_insert(key, &config, options, &fetcher)?;
        if !created {
            query.configure(config.clone(), options, fetcher);
        }
        Ok((query, config))
    }

    /// Returns the query described by `args` without subscribing to it.
    pub fn query<K, T>(&self, args: QueryArgs<K, T>) -> Result<Arc<Query<T>>, QueryError>
    where
        K: Serialize,
        T: Send + Sync + 'static,
    {
        let ResolvedArgs {
            key,
            fetcher,
            options,
        } = resolve_args(args)?;
        self.get_or_create(&key, fetcher, &options)
            .map(|(query, _)| query)
    }

    pub(crate) fn observe_key<T>(
        &self,
        key: QueryKey,
        fetcher: Option<Fetcher<T>>,
        options: &QueryOptions<T>,
        on_change: Option<Listener<T>>,
    ) -> Result<Observer<T>, QueryError>
    where
        T: Send + Sync + 'static,
    {
        self.require_fetcher(&key, fetcher.as_ref())?;
        loop {
            let (query, config) = self.get_or_create(&key, fetcher.clone(), options)?;
            self.check_fetcher(&query)?;
            let callbacks = Callbacks::from_options(options);
            if let Some(observer) = query.attach(config, callbacks, on_change.clone(), false) {
                return Ok(observer);
            }
            trace!(key = %key, "query evicted while subscribing, retrying");
        }
    }

    fn lookup<T>(&self, key: &QueryKey) -> Result<Option<Arc<Query<T>>>, QueryError>
    where
        T: Send + Sync + 'static,
    {
        let Some(entry) = self.registry.queries.get(key.hash()).map(|e| Arc::clone(e.value()))
        else {
            return Ok(None);
        };
        entry
            .into_any()
            .downcast::<Query<T>>()
            .map(Some)
            .map_err(|_| QueryError::TypeMismatch {
                key: key.hash().to_owned(),
            })
    }

    /// Fails without touching the cache when neither the call nor the cached
    /// query provides a producer.
    fn require_fetcher<T>(
        &self,
        key: &QueryKey,
        fetcher: Option<&Fetcher<T>>,
    ) -> Result<(), QueryError>
    where
        T: Send + Sync + 'static,
    {
        if fetcher.is_some() {
            return Ok(());
        }
        match self.lookup::<T>(key)? {
            Some(query) if query.has_fetcher() => Ok(()),
            _ => Err(QueryError::MissingFetcher(key.hash().to_owned())),
        }
    }

    /// Rejects a query that has no producer. If the query is an empty
    /// leftover of this call (its registered producer was evicted in the
    /// meantime), it is evicted again.
    fn check_fetcher<T>(&self, query: &Arc<Query<T>>) -> Result<(), QueryError>
    where
        T: Send + Sync + 'static,
    {
        if query.has_fetcher() {
            return Ok(());
        }
        if query.state().data.is_none() {
            self.registry.evict(query.key(), Arc::as_ptr(query).cast());
        }
        Err(QueryError::MissingFetcher(query.key().hash().to_owned()))
    }

    /// Subscribes to the query described by `args`.
    ///
    /// The query fetches if it has no data, or if its data is stale and
    /// `refetch_on_mount` is set.
    ///
    /// # Errors
    ///
    /// Fails on an invalid key, when the key is cached with another data
    /// type, or when no fetcher is known for the key.
    pub fn observe<K, T>(&self, args: QueryArgs<K, T>) -> Result<Observer<T>, QueryError>
    where
        K: Serialize,
        T: Send + Sync + 'static,
    {
        let ResolvedArgs {
            key,
            fetcher,
            options,
        } = resolve_args(args)?;
        self.observe_key(key, fetcher, &options, None)
    }

    /// Like [`observe`](Self::observe), calling `on_change` after every state
    /// transition of the query.
    pub fn watch<K, T, F>(
        &self,
        args: QueryArgs<K, T>,
        on_change: F,
    ) -> Result<Observer<T>, QueryError>
    where
        K: Serialize,
        T: Send + Sync + 'static,
        F: Fn(&QueryState<T>) + Send + Sync + 'static,
    {
        let ResolvedArgs {
            key,
            fetcher,
            options,
        } = resolve_args(args)?;
        self.observe_key(key, fetcher, &options, Some(Arc::new(on_change)))
    }

    /// Subscribes and yields the current state followed by every change.
    pub fn stream<K, T>(&self, args: QueryArgs<K, T>) -> Result<QueryStream<T>, QueryError>
    where
        K: Serialize,
        T: Send + Sync + 'static,
    {
        let ResolvedArgs {
            key,
            fetcher,
            options,
        } = resolve_args(args)?;
        self.require_fetcher(&key, fetcher.as_ref())?;
        loop {
            let (query, config) = self.get_or_create(&key, fetcher.clone(), &options)?;
            self.check_fetcher(&query)?;
            let stream = query.stream_with(config, Callbacks::from_options(&options));
            if stream.observer().is_some() {
                return Ok(stream);
            }
        }
    }

    /// Fetches the query into the cache without subscribing.
    ///
    /// Fresh data is not refetched. The query is garbage collected after
    /// `cache_time` unless something subscribes.
    pub fn prefetch<K, T>(&self, args: QueryArgs<K, T>) -> Result<FetchHandle, QueryError>
    where
        K: Serialize,
        T: Send + Sync + 'static,
    {
        let ResolvedArgs {
            key,
            fetcher,
            options,
        } = resolve_args(args)?;
        self.require_fetcher(&key, fetcher.as_ref())?;
        let (query, _) = self.get_or_create(&key, fetcher, &options)?;
        self.check_fetcher(&query)?;
        let state = query.state();
        if state.data.is_none() || state.is_stale {
            Ok(query.refetch())
        } else {
            trace!(key = %query.key(), "prefetch skipped, data is fresh");
            Ok(FetchHandle::ready())
        }
    }

    /// Returns the cached query for `key`, if any.
    pub fn get_query<T, K>(&self, key: &K) -> Result<Option<Arc<Query<T>>>, QueryError>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
    {
        self.lookup(&QueryKey::normalize(key)?)
    }

    /// The cached data for `key`, if the entry exists and has data.
    ///
    /// Fails with `TypeMismatch` when the entry holds another data type.
    pub fn get_query_data<T, K>(&self, key: &K) -> Result<Option<Arc<T>>, QueryError>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
    {
        Ok(self
            .get_query::<T, K>(key)?
            .and_then(|query| query.state().data))
    }

    /// Writes data for `key`, creating the query if needed.
    pub fn set_query_data<T, K, F>(&self, key: &K, updater: F) -> Result<(), QueryError>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
        F: FnOnce(Option<&T>) -> T,
    {
        let key = QueryKey::normalize(key)?;
        let options = QueryOptions::default();
        let config = self.config.merge(&options.overrides);
        let (query, _) = self.find_or_insert(&key, &config, &options, &None)?;
        query.set_data(updater);
        Ok(())
    }

    /// Marks matching queries stale and refetches those with observers.
    ///
    /// Returns the number of queries matched.
    pub fn invalidate(&self, filter: &QueryFilter) -> usize {
        let matched: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|entry| filter.matches(entry.cache_key()))
            .collect();
        let count = matched.len();
        let mut refetched = 0;
        for entry in matched {
            if entry.invalidate_entry() {
                refetched += 1;
            }
        }
        debug!(?filter, count, refetched, "invalidated queries");
        count
    }

    /// Refetches every matching query, observed or not.
    pub fn refetch_queries(&self, filter: &QueryFilter) -> Vec<FetchHandle> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|entry| filter.matches(entry.cache_key()))
            .map(|entry| entry.refetch_entry())
            .collect()
    }

    /// Evicts matching queries immediately.
    pub fn remove_queries(&self, filter: &QueryFilter) -> usize {
        let removed = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|entry| filter.matches(entry.cache_key()))
            .filter(|entry| self.registry.remove(entry))
            .count();
        debug!(?filter, removed, "removed queries");
        removed
    }

    /// Refetches stale queries whose observers opted into
    /// `refetch_on_window_focus`.
    pub fn window_focused(&self) {
        for entry in self.registry.snapshot() {
            entry.focus_entry();
        }
    }

    /// Number of queries with a fetch in flight.
    pub fn is_fetching(&self) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|entry| entry.fetching())
            .count()
    }

    /// Number of cached queries.
    pub fn len(&self) -> usize {
        self.registry.queries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.registry.queries.is_empty()
    }

    /// Tears down and removes every query.
    pub fn clear(&self) {
        debug!(count = self.len(), "clearing query cache");
        self.registry.clear();
    }

    /// Creates a mutation using this client's mutation defaults.
    pub fn mutation<V, O, S>(
        &self,
        mutator: Mutator<V, O>,
        options: MutationOptions<V, O, S>,
    ) -> Mutation<V, O, S>
    where
        V: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
    {
        Mutation::with_options(mutator, options, self.mutation_config)
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("queries", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
