//! Layered query and mutation configuration.
//!
//! A [`QueryConfig`] holds the global defaults. Provider scopes and call
//! sites contribute [`QueryOverrides`], which are merged in priority order:
//! call-site override > nearest provider scope > global defaults.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;
use crate::key::QueryKey;

/// Upper bound for [`RetryDelay::Exponential`].
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retry policy applied when a producer fails.
#[derive(Clone)]
pub enum Retry {
    /// Never retry.
    Never,
    /// Retry until the producer succeeds.
    Always,
    /// Retry at most this many times.
    Count(u32),
    /// Retry while the predicate over `(failure_count, error)` holds.
    Predicate(Arc<dyn Fn(u32, &QueryError) -> bool + Send + Sync>),
}

impl Retry {
    /// Whether to retry after `failure_count` consecutive failures.
    #[must_use]
    pub fn should_retry(&self, failure_count: u32, error: &QueryError) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Count(max) => failure_count <= *max,
            Self::Predicate(f) => f(failure_count, error),
        }
    }
}

impl fmt::Debug for Retry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Always => f.write_str("Always"),
            Self::Count(n) => f.debug_tuple("Count").field(n).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<bool> for Retry {
    fn from(retry: bool) -> Self {
        if retry { Self::Always } else { Self::Never }
    }
}

impl From<u32> for Retry {
    fn from(count: u32) -> Self {
        if count == 0 {
            Self::Never
        } else {
            Self::Count(count)
        }
    }
}

/// Delay between retry attempts.
#[derive(Clone)]
pub enum RetryDelay {
    /// `min(1000ms * 2^attempt, 30s)`.
    Exponential,
    /// The same delay before every retry.
    Fixed(Duration),
    /// A custom function of the attempt index.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryDelay {
    /// Delay before retry number `attempt + 1`, where `attempt` counts
    /// retries already performed.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(1000u64.saturating_mul(factor)).min(MAX_RETRY_DELAY)
            }
            Self::Fixed(delay) => *delay,
            Self::Custom(f) => f(attempt),
        }
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => f.write_str("Exponential"),
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub type SuccessHook = Arc<dyn Fn(&QueryKey, &(dyn Any + Send + Sync)) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&QueryKey, &QueryError) + Send + Sync>;
pub type SettledHook = Arc<dyn Fn(&QueryKey, Option<&QueryError>) + Send + Sync>;

/// Cache-level callbacks, run for every query before the observer's own
/// callbacks.
///
/// The success hook receives the data type-erased; downcast it to the
/// query's data type where needed.
#[derive(Clone, Default)]
pub struct QueryHooks {
    pub on_success: Option<SuccessHook>,
    pub on_error: Option<ErrorHook>,
    pub on_settled: Option<SettledHook>,
}

impl fmt::Debug for QueryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHooks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_settled", &self.on_settled.is_some())
            .finish()
    }
}

/// Configuration for query behavior.
///
/// This controls how queries cache data, when they consider it stale and
/// how failures are retried.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Whether queries fetch automatically.
    pub enabled: bool,

    pub retry: Retry,

    pub retry_delay: RetryDelay,

    /// How long data is considered fresh before becoming stale.
    ///
    /// `Some(Duration::ZERO)` marks data stale as soon as it settles;
    /// `None` means data never goes stale on its own.
    pub stale_time: Option<Duration>,

    /// How long a query without observers is retained before being
    /// garbage collected. `None` keeps it forever.
    pub cache_time: Option<Duration>,

    pub refetch_on_window_focus: bool,

    /// Refetch on this interval while an observer is subscribed.
    pub refetch_interval: Option<Duration>,

    /// Refetch stale data when a new observer subscribes.
    pub refetch_on_mount: bool,

    pub suspense: bool,

    /// Surface `Error` states as `Err` from [`Observer::result`]. Falls back
    /// to `suspense` when unset.
    ///
    /// [`Observer::result`]: crate::query::Observer::result
    pub use_error_boundary: Option<bool>,

    pub hooks: QueryHooks,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: Retry::Count(3),
            retry_delay: RetryDelay::Exponential,
            stale_time: Some(Duration::from_secs(0)), // immediately stale
            cache_time: Some(Duration::from_secs(5 * 60)), // 5 minutes
            refetch_on_window_focus: true,
            refetch_interval: None,
            refetch_on_mount: true,
            suspense: false,
            use_error_boundary: None,
            hooks: QueryHooks::default(),
        }
    }
}

impl QueryConfig {
    /// Creates a default configuration with the given stale and cache times.
    #[must_use]
    pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time: Some(stale_time),
            cache_time: Some(cache_time),
            ..Self::default()
        }
    }

    /// Returns a copy with every field set in `overrides` replaced.
    #[must_use]
    pub fn merge(&self, overrides: &QueryOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(enabled) = overrides.enabled {
            merged.enabled = enabled;
        }
        if let Some(retry) = &overrides.retry {
            merged.retry = retry.clone();
        }
        if let Some(retry_delay) = &overrides.retry_delay {
            merged.retry_delay = retry_delay.clone();
        }
        if let Some(stale_time) = overrides.stale_time {
            merged.stale_time = stale_time;
        }
        if let Some(cache_time) = overrides.cache_time {
            merged.cache_time = cache_time;
        }
        if let Some(focus) = overrides.refetch_on_window_focus {
            merged.refetch_on_window_focus = focus;
        }
        if let Some(interval) = overrides.refetch_interval {
            merged.refetch_interval = interval;
        }
        if let Some(mount) = overrides.refetch_on_mount {
            merged.refetch_on_mount = mount;
        }
        if let Some(suspense) = overrides.suspense {
            merged.suspense = suspense;
        }
        if let Some(boundary) = overrides.use_error_boundary {
            merged.use_error_boundary = Some(boundary);
        }
        if let Some(hooks) = &overrides.hooks {
            merged.hooks = hooks.clone();
        }
        merged
    }

    /// Whether `Error` states are raised to the caller.
    #[must_use]
    pub fn throws_errors(&self) -> bool {
        self.use_error_boundary.unwrap_or(self.suspense)
    }

    /// Whether data updated `elapsed` ago is stale.
    #[must_use]
    pub fn is_expired(&self, elapsed: Duration) -> bool {
        self.stale_time.is_some_and(|stale_time| elapsed >= stale_time)
    }
}

/// A partial configuration layer.
///
/// Unset fields defer to the layer below.
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    pub enabled: Option<bool>,
    pub retry: Option<Retry>,
    pub retry_delay: Option<RetryDelay>,
    pub stale_time: Option<Option<Duration>>,
    pub cache_time: Option<Option<Duration>>,
    pub refetch_on_window_focus: Option<bool>,
    pub refetch_interval: Option<Option<Duration>>,
    pub refetch_on_mount: Option<bool>,
    pub suspense: Option<bool>,
    pub use_error_boundary: Option<bool>,
    pub hooks: Option<QueryHooks>,
}

impl QueryOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, retry_delay: RetryDelay) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// Sets the stale time; `None` means never stale.
    #[must_use]
    pub fn stale_time(mut self, stale_time: Option<Duration>) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Sets the cache time; `None` means never collected.
    #[must_use]
    pub fn cache_time(mut self, cache_time: Option<Duration>) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    #[must_use]
    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = Some(refetch);
        self
    }

    #[must_use]
    pub fn refetch_interval(mut self, interval: Option<Duration>) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn refetch_on_mount(mut self, refetch: bool) -> Self {
        self.refetch_on_mount = Some(refetch);
        self
    }

    #[must_use]
    pub fn suspense(mut self, suspense: bool) -> Self {
        self.suspense = Some(suspense);
        self
    }

    #[must_use]
    pub fn use_error_boundary(mut self, use_error_boundary: bool) -> Self {
        self.use_error_boundary = Some(use_error_boundary);
        self
    }

    /// Replaces the cache-level hooks of the layers below.
    #[must_use]
    pub fn hooks(mut self, hooks: QueryHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Stacks `top` over `self`; fields set in `top` win.
    #[must_use]
    pub fn layer(&self, top: &Self) -> Self {
        Self {
            enabled: top.enabled.or(self.enabled),
            retry: top.retry.clone().or_else(|| self.retry.clone()),
            retry_delay: top.retry_delay.clone().or_else(|| self.retry_delay.clone()),
            stale_time: top.stale_time.or(self.stale_time),
            cache_time: top.cache_time.or(self.cache_time),
            refetch_on_window_focus: top.refetch_on_window_focus.or(self.refetch_on_window_focus),
            refetch_interval: top.refetch_interval.or(self.refetch_interval),
            refetch_on_mount: top.refetch_on_mount.or(self.refetch_on_mount),
            suspense: top.suspense.or(self.suspense),
            use_error_boundary: top.use_error_boundary.or(self.use_error_boundary),
            hooks: top.hooks.clone().or_else(|| self.hooks.clone()),
        }
    }
}

/// Defaults for mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutationConfig {
    /// Propagate producer failures from `Mutation::execute`.
    pub throw_on_error: bool,
    pub suspense: bool,
    pub use_error_boundary: Option<bool>,
}

impl MutationConfig {
    /// Whether `Error` states are raised to the caller.
    #[must_use]
    pub fn throws_errors(&self) -> bool {
        self.use_error_boundary.unwrap_or(self.suspense)
    }
}
