//! The per-key query state machine.
//!
//! A [`Query`] owns the fetch lifecycle of one cache entry: it runs the
//! producer with retries, tracks staleness, accumulates pages for infinite
//! queries and notifies its observers.
//!
//! # Guarantees
//!
//! - At most one producer invocation is outstanding per query. Triggers that
//!   arrive while a fetch is in flight attach to it and receive the same
//!   [`FetchHandle`].
//! - Every fetch captures a monotonically increasing token. A result whose
//!   token is no longer current (the fetch was cancelled or the query torn
//!   down) is discarded instead of applied.
//! - Observers are notified synchronously after each transition, from a
//!   snapshot of the observer list taken before the state lock is released.
//!   Every transition is stamped with a revision, and deliveries for one
//!   query are serialized: a listener never sees an older state after a
//!   newer one, on any runtime flavor.
//! - Retry delays, staleness, interval and collection timers are cancelled
//!   when the query is evicted or the client is cleared.
//!
//! Queries spawn tokio tasks and therefore must be used from within a tokio
//! runtime.

mod observer;
mod options;
mod paginated;
mod retry;
mod state;

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::{CachedQuery, Registry};
use crate::config::{QueryConfig, QueryHooks, Retry, RetryDelay};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::timer::Timer;

pub use observer::{Observer, QueryStream};
pub use options::{
    DataEq, FetchContext, Fetcher, GetFetchMore, OnError, OnSettled, OnSuccess, ParamsFilter,
    QueryOptions, query_fn,
};
pub use paginated::{PaginatedQuery, PaginatedState};
pub use state::{QueryState, QueryStatus};

pub(crate) use observer::Listener;
pub(crate) use options::Callbacks;

use observer::ObserverEntry;
use retry::fetch_with_retry;

/// Completion handle of a fetch.
///
/// Every trigger that attaches to the same in-flight fetch receives a clone
/// of the same handle. Awaiting it waits for the fetch to settle; the fetch
/// itself runs whether or not the handle is awaited.
#[derive(Clone)]
pub struct FetchHandle {
    done: Shared<BoxFuture<'static, ()>>,
}

impl FetchHandle {
    fn spawned(join: tokio::task::JoinHandle<()>) -> Self {
        Self {
            done: async move {
                let _ = join.await;
            }
            .boxed()
            .shared(),
        }
    }

    /// A handle that is already complete.
    #[must_use]
    pub fn ready() -> Self {
        Self {
            done: futures::future::ready(()).boxed().shared(),
        }
    }
}

impl Future for FetchHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.done.poll_unpin(cx)
    }
}

impl fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle").finish_non_exhaustive()
    }
}

enum FetchKind {
    Refetch,
    More(Option<Value>),
}

enum Plan {
    Single,
    /// Fetch these pages in order, replacing the loaded pages.
    Pages(Vec<Option<Value>>),
    /// Fetch one page and append it.
    More(Option<Value>),
}

enum Fetched<T> {
    Data(T),
    Pages(Vec<(Option<Value>, T)>),
    More(Option<Value>, T),
}

/// Everything a fetch task needs, captured when the fetch starts.
struct FetchJob<T> {
    plan: Plan,
    fetcher: Fetcher<T>,
    retry: Retry,
    retry_delay: RetryDelay,
    params_filter: Option<ParamsFilter>,
}

struct ActiveFetch {
    cancel: CancellationToken,
    handle: FetchHandle,
    previous_status: QueryStatus,
}

/// A state transition waiting to be delivered.
struct Notification<T> {
    revision: u64,
    state: QueryState<T>,
    listeners: Vec<Listener<T>>,
}

struct Inner<T> {
    state: QueryState<T>,
    revision: u64,
    config: QueryConfig,
    options: QueryOptions<T>,
    fetcher: Option<Fetcher<T>>,
    page_params: Vec<Option<Value>>,
    next_page_param: Option<Value>,
    observers: Vec<ObserverEntry<T>>,
    next_observer_id: u64,
    token: u64,
    active: Option<ActiveFetch>,
    stale_timer: Option<Timer>,
    gc_timer: Option<Timer>,
    evicted: bool,
}

impl<T> Inner<T> {
    fn refresh_staleness(&mut self) {
        if self.state.is_stale {
            return;
        }
        if let Some(updated_at) = self.state.updated_at
            && self.config.is_expired(updated_at.elapsed())
        {
            self.state.is_stale = true;
        }
    }

    fn snapshot(&mut self) -> QueryState<T> {
        self.refresh_staleness();
        self.state.clone()
    }

    fn listeners(&self) -> Vec<Listener<T>> {
        self.observers
            .iter()
            .filter_map(|o| o.on_change.clone())
            .collect()
    }

    /// Stamps the current state with the next revision.
    fn publish(&mut self) -> Notification<T> {
        self.revision += 1;
        Notification {
            revision: self.revision,
            state: self.snapshot(),
            listeners: self.listeners(),
        }
    }

    fn callbacks(&self) -> Vec<Callbacks<T>> {
        self.observers.iter().map(|o| o.callbacks.clone()).collect()
    }

    /// Recomputes the next page parameter of an infinite query and exposes
    /// the last page as `data`.
    fn update_pagination(&mut self) {
        if !self.options.infinite {
            return;
        }
        self.next_page_param = match (self.state.pages.last(), &self.options.get_fetch_more) {
            (Some(last), Some(get_fetch_more)) => get_fetch_more(last, &self.state.pages),
            _ => None,
        };
        self.state.can_fetch_more = self.next_page_param.is_some();
        self.state.data = self.state.pages.last().cloned();
    }

    fn mark_updated(&mut self) {
        self.state.status = QueryStatus::Success;
        self.state.error = None;
        self.state.failure_count = 0;
        self.state.updated_at = Some(Instant::now());
        self.state.is_stale = false;
    }
}

/// Keeps `previous` when the comparator reports it equal to `next`.
fn retain_equal<T>(previous: Option<&Arc<T>>, next: T, eq: Option<&DataEq<T>>) -> Arc<T> {
    match (previous, eq) {
        (Some(previous), Some(eq)) if eq(previous, &next) => Arc::clone(previous),
        _ => Arc::new(next),
    }
}

/// A cached query for one key.
///
/// Obtain queries from a [`QueryClient`](crate::client::QueryClient); the
/// client guarantees a single `Query` per key hash.
pub struct Query<T> {
    key: QueryKey,
    inner: Mutex<Inner<T>>,
    /// Revision of the last delivered notification. Held while listeners
    /// run; re-entrant so a listener may drive the query itself.
    delivered: ReentrantMutex<Cell<u64>>,
    registry: Weak<Registry>,
}

impl<T> Query<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        key: QueryKey,
        config: QueryConfig,
        options: QueryOptions<T>,
        fetcher: Option<Fetcher<T>>,
        registry: Weak<Registry>,
    ) -> Arc<Self> {
        let status = if config.enabled {
            QueryStatus::Loading
        } else {
            QueryStatus::Idle
        };
        let mut state = QueryState::new(status);
        if let Some(stale) = options.initial_stale {
            state.is_stale = stale;
        }

        let mut inner = Inner {
            state,
            revision: 0,
            config,
            options,
            fetcher,
            page_params: Vec::new(),
            next_page_param: None,
            observers: Vec::new(),
            next_observer_id: 0,
            token: 0,
            active: None,
            stale_timer: None,
            gc_timer: None,
            evicted: false,
        };

        if let Some(data) = inner.options.initial_data.clone() {
            inner.mark_updated();
            inner.state.is_stale = inner.options.initial_stale.unwrap_or(false);
            if inner.options.infinite {
                inner.state.pages = vec![Arc::clone(&data)];
                inner.page_params = vec![None];
            }
            inner.state.data = Some(data);
            inner.update_pagination();
        }

        let query = Arc::new(Self {
            key,
            inner: Mutex::new(inner),
            delivered: ReentrantMutex::new(Cell::new(0)),
            registry,
        });
        {
            let mut inner = query.inner.lock();
            query.schedule_stale(&mut inner);
        }
        query
    }

    /// The normalized key this query is cached under.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.inner.lock().snapshot()
    }

    /// The configuration resolved for the most recent caller.
    pub fn config(&self) -> QueryConfig {
        self.inner.lock().config.clone()
    }

    /// Number of live observers. The query is only collected at zero.
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Whether a fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    pub(crate) fn has_fetcher(&self) -> bool {
        self.inner.lock().fetcher.is_some()
    }

    /// Adopts the configuration, options and producer of the latest caller.
    pub(crate) fn configure(
        &self,
        config: QueryConfig,
        options: &QueryOptions<T>,
        fetcher: Option<Fetcher<T>>,
    ) {
        let mut inner = self.inner.lock();
        inner.config = config;
        inner.options = options.clone();
        if let Some(fetcher) = fetcher {
            inner.fetcher = Some(fetcher);
        }
    }

    /// Starts a fetch, or attaches to the one already in flight.
    pub fn refetch(self: &Arc<Self>) -> FetchHandle {
        self.start_fetch(FetchKind::Refetch)
            .unwrap_or_else(FetchHandle::ready)
    }

    /// Loads the next page of an infinite query.
    ///
    /// `page_param` overrides the parameter derived from the loaded pages.
    /// Returns `None` without invoking the producer if a fetch is in flight
    /// or there is no next page.
    pub fn fetch_more(self: &Arc<Self>, page_param: Option<Value>) -> Option<FetchHandle> {
        self.start_fetch(FetchKind::More(page_param))
    }

    fn start_fetch(self: &Arc<Self>, kind: FetchKind) -> Option<FetchHandle> {
        let (handle, notification) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            if inner.evicted {
                return None;
            }
            if let Some(active) = &inner.active {
                if matches!(kind, FetchKind::More(_)) {
                    trace!(key = %self.key, "fetch more rejected while fetching");
                    return None;
                }
                trace!(key = %self.key, token = inner.token, "attaching to in-flight fetch");
                return Some(active.handle.clone());
            }
            let Some(fetcher) = inner.fetcher.clone() else {
                debug!(key = %self.key, "no query function registered, skipping fetch");
                return None;
            };
            let Ok(runtime) = Handle::try_current() else {
                debug!(key = %self.key, "no tokio runtime, skipping fetch");
                return None;
            };

            let plan = match kind {
                FetchKind::Refetch if inner.options.infinite => {
                    if inner.page_params.is_empty() {
                        Plan::Pages(vec![None])
                    } else {
                        Plan::Pages(inner.page_params.clone())
                    }
                }
                FetchKind::Refetch => Plan::Single,
                FetchKind::More(page_param) => {
                    if !inner.state.can_fetch_more {
                        trace!(key = %self.key, "fetch more rejected, no next page");
                        return None;
                    }
                    Plan::More(page_param.or_else(|| inner.next_page_param.clone()))
                }
            };

            inner.token += 1;
            let token = inner.token;
            let previous_status = inner.state.status;
            inner.state.status = QueryStatus::Loading;
            inner.state.is_fetching = true;
            inner.state.is_fetching_more = matches!(plan, Plan::More(_));
            inner.state.failure_count = 0;

            let job = FetchJob {
                plan,
                fetcher,
                retry: inner.config.retry.clone(),
                retry_delay: inner.config.retry_delay.clone(),
                params_filter: inner.options.params_filter.clone(),
            };

            let cancel = CancellationToken::new();
            let cancelled = cancel.clone();
            let query = Arc::clone(self);
            let join = runtime.spawn(async move {
                tokio::select! {
                    () = cancelled.cancelled() => {
                        trace!(key = %query.key, token, "fetch task cancelled");
                    }
                    outcome = query.run(token, job) => query.settle(token, outcome),
                }
            });

            let handle = FetchHandle::spawned(join);
            inner.active = Some(ActiveFetch {
                cancel,
                handle: handle.clone(),
                previous_status,
            });
            debug!(key = %self.key, token, "query fetch started");

            (handle, inner.publish())
        };

        self.deliver(notification);
        Some(handle)
    }

    fn context(&self, filter: Option<&ParamsFilter>, page_param: Option<Value>) -> FetchContext {
        let args = match filter {
            Some(filter) => filter(self.key.parts()),
            None => self.key.parts().to_vec(),
        };
        FetchContext {
            key: self.key.clone(),
            args,
            page_param,
        }
    }

    async fn run(&self, token: u64, job: FetchJob<T>) -> Result<Fetched<T>, QueryError> {
        let FetchJob {
            plan,
            fetcher,
            retry,
            retry_delay,
            params_filter,
        } = job;
        let filter = params_filter.as_ref();

        match plan {
            Plan::Single => {
                let ctx = self.context(filter, None);
                fetch_with_retry(&fetcher, ctx, &retry, &retry_delay, |count| {
                    self.record_failure(token, count);
                })
                .await
                .map(Fetched::Data)
            }
            Plan::Pages(params) => {
                let mut pages = Vec::with_capacity(params.len());
                for param in params {
                    let ctx = self.context(filter, param.clone());
                    let page = fetch_with_retry(&fetcher, ctx, &retry, &retry_delay, |count| {
                        self.record_failure(token, count);
                    })
                    .await?;
                    pages.push((param, page));
                }
                Ok(Fetched::Pages(pages))
            }
            Plan::More(param) => {
                let ctx = self.context(filter, param.clone());
                fetch_with_retry(&fetcher, ctx, &retry, &retry_delay, |count| {
                    self.record_failure(token, count);
                })
                .await
                .map(|page| Fetched::More(param, page))
            }
        }
    }

    fn record_failure(&self, token: u64, failure_count: u32) {
        let notification = {
            let mut inner = self.inner.lock();
            if inner.token != token {
                return;
            }
            inner.state.failure_count = failure_count;
            inner.publish()
        };
        self.deliver(notification);
    }

    fn settle(self: &Arc<Self>, token: u64, outcome: Result<Fetched<T>, QueryError>) {
        let (notification, callbacks, hooks) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            if inner.token != token {
                trace!(key = %self.key, token, "discarding superseded fetch result");
                return;
            }
            inner.active = None;
            inner.state.is_fetching = false;
            inner.state.is_fetching_more = false;

            match outcome {
                Ok(fetched) => {
                    let eq = inner.options.is_data_equal.clone();
                    match fetched {
                        Fetched::Data(data) => {
                            inner.state.data =
                                Some(retain_equal(inner.state.data.as_ref(), data, eq.as_ref()));
                        }
                        Fetched::Pages(pages) => {
                            let (params, pages): (Vec<_>, Vec<_>) = pages
                                .into_iter()
                                .enumerate()
                                .map(|(i, (param, page))| {
                                    let previous = inner.state.pages.get(i);
                                    (param, retain_equal(previous, page, eq.as_ref()))
                                })
                                .unzip();
                            inner.page_params = params;
                            inner.state.pages = pages;
                        }
                        Fetched::More(param, page) => {
                            inner.page_params.push(param);
                            inner.state.pages.push(Arc::new(page));
                        }
                    }
                    inner.mark_updated();
                    inner.update_pagination();
                    self.schedule_stale(inner);
                }
                Err(error) => {
                    inner.state.status = QueryStatus::Error;
                    inner.state.error = Some(error);
                }
            }

            (inner.publish(), inner.callbacks(), inner.config.hooks.clone())
        };

        let state = notification.state.clone();
        debug!(key = %self.key, token, status = ?state.status, "query fetch settled");
        self.deliver(notification);
        self.run_callbacks(&state, &hooks, &callbacks);
    }

    /// Cache-level hooks first, then each observer's callbacks.
    fn run_callbacks(
        &self,
        state: &QueryState<T>,
        hooks: &QueryHooks,
        callbacks: &[Callbacks<T>],
    ) {
        match (&state.error, &state.data) {
            (Some(error), _) if state.is_error() => {
                if let Some(hook) = &hooks.on_error {
                    hook(&self.key, error);
                }
                for on_error in callbacks.iter().filter_map(|c| c.on_error.as_ref()) {
                    on_error(error);
                }
                if let Some(hook) = &hooks.on_settled {
                    hook(&self.key, Some(error));
                }
                for on_settled in callbacks.iter().filter_map(|c| c.on_settled.as_ref()) {
                    on_settled(None, Some(error));
                }
            }
            (_, Some(data)) => {
                if let Some(hook) = &hooks.on_success {
                    hook(&self.key, &**data);
                }
                for on_success in callbacks.iter().filter_map(|c| c.on_success.as_ref()) {
                    on_success(data);
                }
                if let Some(hook) = &hooks.on_settled {
                    hook(&self.key, None);
                }
                for on_settled in callbacks.iter().filter_map(|c| c.on_settled.as_ref()) {
                    on_settled(Some(&**data), None);
                }
            }
            _ => {}
        }
    }

    /// Replaces the data directly, as if a fetch had just succeeded.
    ///
    /// On an infinite query the updater receives the last page and its
    /// result replaces that page; the other pages are kept. The comparator
    /// set with [`QueryOptions::is_data_equal`] applies as it does to
    /// fetched data.
    pub fn set_data(self: &Arc<Self>, updater: impl FnOnce(Option<&T>) -> T) {
        let previous = self.inner.lock().state.data.clone();
        let next = updater(previous.as_deref());

        let notification = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let eq = inner.options.is_data_equal.clone();
            if inner.options.infinite {
                let page = retain_equal(inner.state.pages.last(), next, eq.as_ref());
                match inner.state.pages.last_mut() {
                    Some(last) => *last = page,
                    None => {
                        inner.state.pages.push(page);
                        inner.page_params.push(None);
                    }
                }
            } else {
                inner.state.data = Some(retain_equal(inner.state.data.as_ref(), next, eq.as_ref()));
            }
            inner.mark_updated();
            inner.update_pagination();
            self.schedule_stale(inner);
            inner.publish()
        };
        trace!(key = %self.key, "query data set");
        self.deliver(notification);
    }

    /// Abandons the in-flight fetch, if any.
    ///
    /// The producer future is dropped and its result, should it still
    /// arrive, is discarded. The status from before the fetch is restored.
    pub fn cancel(&self) {
        let notification = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(active) = inner.active.take() else {
                return;
            };
            active.cancel.cancel();
            inner.token += 1;
            inner.state.status = active.previous_status;
            inner.state.is_fetching = false;
            inner.state.is_fetching_more = false;
            inner.publish()
        };
        debug!(key = %self.key, "query fetch cancelled");
        self.deliver(notification);
    }

    /// Marks the data stale and refetches if the query is observed.
    ///
    /// Returns whether a refetch was triggered. Unobserved queries refetch
    /// on their next subscription.
    pub fn invalidate(self: &Arc<Self>) -> bool {
        let (refetch, notification) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.stale_timer = None;
            inner.state.is_stale = true;
            let refetch = inner.config.enabled && !inner.observers.is_empty() && !inner.evicted;
            (refetch, inner.publish())
        };
        debug!(key = %self.key, refetch, "query invalidated");
        self.deliver(notification);
        if refetch {
            let _ = self.refetch();
        }
        refetch
    }

    fn window_focused(self: &Arc<Self>) {
        let refetch = {
            let mut inner = self.inner.lock();
            inner.refresh_staleness();
            inner.state.is_stale
                && inner
                    .observers
                    .iter()
                    .any(|o| o.config.enabled && o.config.refetch_on_window_focus)
        };
        if refetch {
            trace!(key = %self.key, "refetching on window focus");
            let _ = self.refetch();
        }
    }

    fn schedule_stale(self: &Arc<Self>, inner: &mut Inner<T>) {
        inner.stale_timer = None;
        let (Some(updated_at), false) = (inner.state.updated_at, inner.state.is_stale) else {
            return;
        };
        let Some(stale_time) = inner.config.stale_time else {
            return;
        };
        if stale_time.is_zero() {
            inner.state.is_stale = true;
            return;
        }

        let remaining = stale_time.saturating_sub(updated_at.elapsed());
        let query = Arc::downgrade(self);
        inner.stale_timer = Some(Timer::after(remaining, move || {
            if let Some(query) = query.upgrade() {
                query.mark_stale();
            }
        }));
    }

    fn mark_stale(&self) {
        let notification = {
            let mut inner = self.inner.lock();
            if inner.state.is_stale {
                return;
            }
            inner.state.is_stale = true;
            inner.publish()
        };
        trace!(key = %self.key, "query became stale");
        self.deliver(notification);
    }

    /// Schedules eviction after `cache_time` unless an observer attaches.
    fn schedule_gc(self: &Arc<Self>, inner: &mut Inner<T>) {
        inner.gc_timer = None;
        if inner.evicted || !inner.observers.is_empty() {
            return;
        }
        let Some(cache_time) = inner.config.cache_time else {
            return;
        };

        let cache_time_ms = cache_time.as_millis() as u64;
        trace!(key = %self.key, cache_time_ms, "scheduling garbage collection");
        let query = Arc::downgrade(self);
        inner.gc_timer = Some(Timer::after(cache_time, move || {
            if let Some(query) = query.upgrade() {
                query.collect();
            }
        }));
    }

    pub(crate) fn schedule_gc_if_unobserved(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        self.schedule_gc(&mut inner);
    }

    fn collect(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.evict(&self.key, (self as *const Self).cast());
        }
    }
}

impl<T> Query<T> {
    /// Hands `notification` to its listeners unless a newer revision has
    /// already gone out.
    fn deliver(&self, notification: Notification<T>) {
        let delivered = self.delivered.lock();
        if delivered.get() >= notification.revision {
            let revision = notification.revision;
            trace!(key = %self.key, revision, "dropping superseded notification");
            return;
        }
        delivered.set(notification.revision);
        for listener in &notification.listeners {
            // A listener that drove the query has already delivered a newer state.
            if delivered.get() != notification.revision {
                break;
            }
            listener(&notification.state);
        }
    }
}

impl<T> CachedQuery for Query<T>
where
    T: Send + Sync + 'static,
{
    fn cache_key(&self) -> &QueryKey {
        &self.key
    }

    fn observers(&self) -> usize {
        self.observer_count()
    }

    fn fetching(&self) -> bool {
        self.is_fetching()
    }

    fn invalidate_entry(self: Arc<Self>) -> bool {
        self.invalidate()
    }

    fn refetch_entry(self: Arc<Self>) -> FetchHandle {
        self.refetch()
    }

    fn focus_entry(self: Arc<Self>) {
        self.window_focused();
    }

    fn try_evict(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.observers.is_empty() {
            return false;
        }
        inner.evicted = true;
        true
    }

    fn teardown(&self) {
        let (active, timers) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.evicted = true;
            inner.token += 1;
            inner.state.is_fetching = false;
            inner.state.is_fetching_more = false;
            let mut timers: Vec<Timer> = inner
                .observers
                .iter_mut()
                .filter_map(|o| o.interval.take())
                .collect();
            timers.extend(inner.stale_timer.take());
            timers.extend(inner.gc_timer.take());
            (inner.active.take(), timers)
        };
        if let Some(active) = active {
            active.cancel.cancel();
        }
        for timer in &timers {
            timer.cancel();
        }
        trace!(key = %self.key, "query torn down");
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
