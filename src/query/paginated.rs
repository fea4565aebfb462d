use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::QueryKey;

use super::observer::{Listener, Observer};
use super::options::{Fetcher, QueryOptions};
use super::state::{QueryState, QueryStatus};

/// State of a [`PaginatedQuery`].
#[derive(Debug)]
pub struct PaginatedState<T> {
    /// State of the query for the current key.
    pub state: QueryState<T>,
    /// `Success` whenever `resolved_data` is present, otherwise the current
    /// query's status.
    pub status: QueryStatus,
    /// The current key's data, falling back to the last data any key of
    /// this handle resolved while the new key loads.
    pub resolved_data: Option<Arc<T>>,
    /// The current key's data only.
    pub latest_data: Option<Arc<T>>,
}

/// A query whose key changes over time, such as a page number, that keeps
/// showing the previous key's data until the new key resolves.
///
/// ```no_run
/// # async fn demo() -> Result<(), refetch::error::QueryError> {
/// use refetch::client::QueryClient;
/// use refetch::query::{PaginatedQuery, QueryOptions, query_fn};
///
/// let client = QueryClient::new();
/// let fetcher = query_fn(|ctx| async move { Ok(ctx.args.len()) });
/// let mut page = PaginatedQuery::new(client, Some(fetcher), QueryOptions::new());
/// page.set_key(&("projects", 1))?;
/// page.set_key(&("projects", 2))?;
/// let state = page.state().expect("key is set");
/// let _shown = state.resolved_data;
/// # Ok(())
/// # }
/// ```
pub struct PaginatedQuery<T: Send + Sync + 'static> {
    client: QueryClient,
    fetcher: Option<Fetcher<T>>,
    options: QueryOptions<T>,
    observer: Option<Observer<T>>,
    last_data: Arc<Mutex<Option<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> PaginatedQuery<T> {
    /// Creates a paginated query with no key yet. `fetcher` may be `None`
    /// when every key it will follow already has a registered producer.
    pub fn new(
        client: QueryClient,
        fetcher: Option<Fetcher<T>>,
        options: QueryOptions<T>,
    ) -> Self {
        Self {
            client,
            fetcher,
            options,
            observer: None,
            last_data: Arc::new(Mutex::new(None)),
        }
    }

    /// Switches to `key`, subscribing to its query and releasing the
    /// previous one.
    pub fn set_key<K: Serialize + ?Sized>(&mut self, key: &K) -> Result<(), QueryError> {
        let key = QueryKey::normalize(key)?;
        let mut options = self.options.clone();
        if self.last_data.lock().is_some() {
            // Placeholder data wins over seeded data once something resolved.
            options.initial_data = None;
        }

        let last_data = Arc::clone(&self.last_data);
        let on_change: Listener<T> = Arc::new(move |state: &QueryState<T>| {
            if state.is_success()
                && let Some(data) = &state.data
            {
                *last_data.lock() = Some(Arc::clone(data));
            }
        });
        let observer = self
            .client
            .observe_key(key, self.fetcher.clone(), &options, Some(on_change))?;

        if observer.config().enabled {
            let state = observer.state();
            if state.is_success()
                && let Some(data) = state.data
            {
                *self.last_data.lock() = Some(data);
            }
        } else {
            *self.last_data.lock() = None;
        }

        trace!(key = %observer.key(), "paginated query switched key");
        self.observer = Some(observer);
        Ok(())
    }

    /// The observer of the current key's query.
    pub fn observer(&self) -> Option<&Observer<T>> {
        self.observer.as_ref()
    }

    /// The current state, or `None` before the first key is set.
    pub fn state(&self) -> Option<PaginatedState<T>> {
        let observer = self.observer.as_ref()?;
        let state = observer.state();
        let latest_data = state.data.clone();
        let resolved_data = latest_data
            .clone()
            .or_else(|| self.last_data.lock().clone());
        let status = if resolved_data.is_some() {
            QueryStatus::Success
        } else {
            state.status
        };
        Some(PaginatedState {
            state,
            status,
            resolved_data,
            latest_data,
        })
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for PaginatedQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginatedQuery")
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}
