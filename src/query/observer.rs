use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::timer::Timer;

use super::options::Callbacks;
use super::state::QueryState;
use super::{FetchHandle, Query};

pub(crate) type Listener<T> = Arc<dyn Fn(&QueryState<T>) + Send + Sync>;

/// A subscription as recorded on the query.
pub(crate) struct ObserverEntry<T> {
    pub(crate) id: u64,
    pub(crate) config: QueryConfig,
    pub(crate) callbacks: Callbacks<T>,
    pub(crate) on_change: Option<Listener<T>>,
    pub(crate) interval: Option<Timer>,
}

/// A live subscription to a [`Query`].
///
/// While at least one observer exists the query is never garbage collected.
/// Dropping the observer unsubscribes it.
pub struct Observer<T: Send + Sync + 'static> {
    query: Arc<Query<T>>,
    id: u64,
    config: QueryConfig,
}

impl<T: Send + Sync + 'static> Observer<T> {
    /// The observed query, shared with every other observer of its key.
    pub fn query(&self) -> &Arc<Query<T>> {
        &self.query
    }

    /// The normalized key of the observed query.
    pub fn key(&self) -> &QueryKey {
        self.query.key()
    }

    /// The configuration this observer subscribed with.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// A snapshot of the query's current state.
    pub fn state(&self) -> QueryState<T> {
        self.query.state()
    }

    /// The state, or the query's error when this observer raises errors
    /// (`use_error_boundary`, falling back to `suspense`).
    pub fn result(&self) -> Result<QueryState<T>, QueryError> {
        let state = self.state();
        if self.config.throws_errors()
            && state.is_error()
            && let Some(error) = &state.error
        {
            return Err(error.clone());
        }
        Ok(state)
    }

    /// Refetches the query, or joins the fetch already in flight.
    pub fn refetch(&self) -> FetchHandle {
        self.query.refetch()
    }

    /// Loads the next page of an infinite query. See [`Query::fetch_more`].
    pub fn fetch_more(&self, page_param: Option<Value>) -> Option<FetchHandle> {
        self.query.fetch_more(page_param)
    }

    /// Writes the query's data. See [`Query::set_data`].
    pub fn set_data(&self, updater: impl FnOnce(Option<&T>) -> T) {
        self.query.set_data(updater);
    }

    /// Equivalent to dropping the observer.
    pub fn unsubscribe(self) {}
}

impl<T: Send + Sync + 'static> Drop for Observer<T> {
    fn drop(&mut self) {
        self.query.detach(self.id);
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("key", self.key())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A stream of state snapshots, starting with the current state.
///
/// The stream holds an observer for as long as it lives.
pub struct QueryStream<T: Send + Sync + 'static> {
    rx: mpsc::UnboundedReceiver<QueryState<T>>,
    observer: Option<Observer<T>>,
}

impl<T: Send + Sync + 'static> QueryStream<T> {
    /// The observer backing the stream, or `None` if the query was evicted
    /// before it could subscribe.
    pub fn observer(&self) -> Option<&Observer<T>> {
        self.observer.as_ref()
    }
}

impl<T: Send + Sync + 'static> Stream for QueryStream<T> {
    type Item = QueryState<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Query<T>
where
    T: Send + Sync + 'static,
{
    /// Registers an observer.
    ///
    /// Fetches when the observer is enabled and the query has no data, or
    /// has stale data and `refetch_on_mount` is set. Returns `None` if the
    /// query has already been evicted.
    ///
    /// With `replay`, `on_change` first receives the current state, taken
    /// under the same lock that registers it.
    pub(crate) fn attach(
        self: &Arc<Self>,
        config: QueryConfig,
        callbacks: Callbacks<T>,
        on_change: Option<Listener<T>>,
        replay: bool,
    ) -> Option<Observer<T>> {
        let (id, fetch) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if inner.evicted {
                return None;
            }
            inner.gc_timer = None;
            inner.config = config.clone();

            let id = inner.next_observer_id;
            inner.next_observer_id += 1;

            let interval = match config.refetch_interval {
                Some(period) if config.enabled && !period.is_zero() => {
                    let query = Arc::downgrade(self);
                    Some(Timer::every(period, move || {
                        if let Some(query) = query.upgrade() {
                            let _ = query.refetch();
                        }
                    }))
                }
                _ => None,
            };
            if replay && let Some(listener) = &on_change {
                listener(&inner.snapshot());
            }
            inner.observers.push(ObserverEntry {
                id,
                config: config.clone(),
                callbacks,
                on_change,
                interval,
            });

            inner.refresh_staleness();
            let refetch_stale = config.refetch_on_mount && inner.state.is_stale;
            let fetch = config.enabled && (inner.state.data.is_none() || refetch_stale);
            (id, fetch)
        };

        trace!(key = %self.key, observer = id, fetch, "observer attached");
        if fetch {
            let _ = self.refetch();
        }
        Some(Observer {
            query: Arc::clone(self),
            id,
            config,
        })
    }

    pub(crate) fn detach(self: &Arc<Self>, id: u64) {
        let removed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(position) = inner.observers.iter().position(|o| o.id == id) else {
                return;
            };
            let removed = inner.observers.remove(position);
            if inner.observers.is_empty() {
                self.schedule_gc(inner);
            }
            removed
        };
        trace!(key = %self.key, observer = id, "observer detached");
        drop(removed);
    }

    /// Subscribes with the query's current configuration, calling
    /// `on_change` after every state transition.
    pub fn subscribe(
        self: &Arc<Self>,
        on_change: impl Fn(&QueryState<T>) + Send + Sync + 'static,
    ) -> Option<Observer<T>> {
        let config = self.config();
        self.attach(config, Callbacks::none(), Some(Arc::new(on_change)), false)
    }

    /// Subscribes and yields every state transition as a stream.
    pub fn stream(self: &Arc<Self>) -> QueryStream<T> {
        let config = self.config();
        self.stream_with(config, Callbacks::none())
    }

    pub(crate) fn stream_with(
        self: &Arc<Self>,
        config: QueryConfig,
        callbacks: Callbacks<T>,
    ) -> QueryStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener<T> = Arc::new(move |state: &QueryState<T>| {
            let _ = tx.send(state.clone());
        });
        let observer = self.attach(config, callbacks, Some(listener), true);
        QueryStream { rx, observer }
    }
}
