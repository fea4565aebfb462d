use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::QueryOverrides;
use crate::error::QueryError;
use crate::key::QueryKey;

/// What a producer is asked to fetch.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub key: QueryKey,
    /// The key parts after the query's params filter.
    pub args: Vec<Value>,
    /// Page parameter for infinite queries; `None` for the first page.
    pub page_param: Option<Value>,
}

/// The asynchronous producer behind a query.
pub type Fetcher<T> =
    Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

pub type DataEq<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;
pub type GetFetchMore<T> = Arc<dyn Fn(&T, &[Arc<T>]) -> Option<Value> + Send + Sync>;
pub type ParamsFilter = Arc<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>;
pub type OnSuccess<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type OnError = Arc<dyn Fn(&QueryError) + Send + Sync>;
pub type OnSettled<T> = Arc<dyn Fn(Option<&T>, Option<&QueryError>) + Send + Sync>;

/// Builds a [`Fetcher`] from an async closure.
///
/// # Example
///
/// ```
/// use refetch::query::{FetchContext, Fetcher, query_fn};
///
/// let fetcher: Fetcher<Vec<u32>> = query_fn(|ctx: FetchContext| async move {
///     let _ = ctx.key;
///     Ok(vec![1, 2, 3])
/// });
/// ```
pub fn query_fn<T, F, Fut>(f: F) -> Fetcher<T>
where
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Call-site options for a query.
///
/// `overrides` is layered over the client's configuration. The remaining
/// fields depend on the data type. Callbacks registered here fire for
/// fetches that settle while the registering observer is subscribed, after
/// the cache-level hooks.
pub struct QueryOptions<T> {
    pub overrides: QueryOverrides,
    /// Data to seed a newly created query with.
    pub initial_data: Option<Arc<T>>,
    /// Whether seeded data starts out stale.
    pub initial_stale: Option<bool>,
    /// Keeps the previous data when it compares equal to a refetch result.
    pub is_data_equal: Option<DataEq<T>>,
    pub on_success: Option<OnSuccess<T>>,
    pub on_error: Option<OnError>,
    pub on_settled: Option<OnSettled<T>>,
    /// Accumulate pages instead of replacing data.
    pub infinite: bool,
    /// Derives the next page parameter from the last page and all pages.
    /// `None` means there are no more pages.
    pub get_fetch_more: Option<GetFetchMore<T>>,
    pub params_filter: Option<ParamsFilter>,
}

impl<T> QueryOptions<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers `overrides` over the values already set; fields it leaves
    /// unset keep their current value.
    #[must_use]
    pub fn overrides(mut self, overrides: QueryOverrides) -> Self {
        self.overrides = self.overrides.layer(&overrides);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.overrides.enabled = Some(enabled);
        self
    }

    /// `None` keeps data fresh forever.
    #[must_use]
    pub fn stale_time(mut self, stale_time: Option<Duration>) -> Self {
        self.overrides.stale_time = Some(stale_time);
        self
    }

    #[must_use]
    pub fn cache_time(mut self, cache_time: Option<Duration>) -> Self {
        self.overrides.cache_time = Some(cache_time);
        self
    }

    #[must_use]
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(Arc::new(data));
        self
    }

    /// Whether `initial_data` starts stale; it starts fresh by default.
    #[must_use]
    pub fn initial_stale(mut self, stale: bool) -> Self {
        self.initial_stale = Some(stale);
        self
    }

    /// Comparator deciding whether new data equals the cached data, in which
    /// case the cached `Arc` is kept. Without one every result counts as a
    /// change; [`compare_eq`](Self::compare_eq) opts into `PartialEq`.
    #[must_use]
    pub fn is_data_equal(mut self, f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.is_data_equal = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_settled(
        mut self,
        f: impl Fn(Option<&T>, Option<&QueryError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }

    /// Turns the query into an infinite query.
    #[must_use]
    pub fn infinite(
        mut self,
        get_fetch_more: impl Fn(&T, &[Arc<T>]) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.infinite = true;
        self.get_fetch_more = Some(Arc::new(get_fetch_more));
        self
    }

    /// Maps the key parts before they reach the producer as
    /// [`FetchContext::args`].
    #[must_use]
    pub fn params_filter(
        mut self,
        f: impl Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.params_filter = Some(Arc::new(f));
        self
    }
}

impl<T: PartialEq + 'static> QueryOptions<T> {
    /// Uses `PartialEq` to decide whether refetched data changed.
    #[must_use]
    pub fn compare_eq(self) -> Self {
        self.is_data_equal(|a, b| a == b)
    }
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            overrides: QueryOverrides::default(),
            initial_data: None,
            initial_stale: None,
            is_data_equal: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            infinite: false,
            get_fetch_more: None,
            params_filter: None,
        }
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            overrides: self.overrides.clone(),
            initial_data: self.initial_data.clone(),
            initial_stale: self.initial_stale,
            is_data_equal: self.is_data_equal.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            infinite: self.infinite,
            get_fetch_more: self.get_fetch_more.clone(),
            params_filter: self.params_filter.clone(),
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("overrides", &self.overrides)
            .field("initial_data", &self.initial_data.is_some())
            .field("initial_stale", &self.initial_stale)
            .field("infinite", &self.infinite)
            .finish_non_exhaustive()
    }
}

/// The observer-level callbacks of a [`QueryOptions`].
pub(crate) struct Callbacks<T> {
    pub(crate) on_success: Option<OnSuccess<T>>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_settled: Option<OnSettled<T>>,
}

impl<T> Callbacks<T> {
    pub(crate) fn none() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    pub(crate) fn from_options(options: &QueryOptions<T>) -> Self {
        Self {
            on_success: options.on_success.clone(),
            on_error: options.on_error.clone(),
            on_settled: options.on_settled.clone(),
        }
    }
}

impl<T> Clone for Callbacks<T> {
    fn clone(&self) -> Self {
        Self {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}
