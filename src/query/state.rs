use std::sync::Arc;

use tokio::time::Instant;

use crate::error::QueryError;

/// Fetch status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No fetch has been requested yet.
    Idle,
    /// A fetch is in progress.
    Loading,
    /// The most recent fetch succeeded.
    Success,
    /// The most recent fetch failed after exhausting retries.
    Error,
}

/// A read-only snapshot of a query.
///
/// `data` is shared behind an [`Arc`]; when a refetch yields data the
/// query's `is_data_equal` comparator considers unchanged, the previous
/// `Arc` is kept so consumers can compare by pointer.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    /// The latest data. For infinite queries this is the most recently
    /// loaded page.
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub is_fetching_more: bool,
    pub is_stale: bool,
    pub can_fetch_more: bool,
    /// Consecutive producer failures of the current or last fetch.
    pub failure_count: u32,
    pub updated_at: Option<Instant>,
    /// Loaded pages, in load order. Empty unless the query is infinite.
    pub pages: Vec<Arc<T>>,
}

impl<T> QueryState<T> {
    pub(crate) const fn new(status: QueryStatus) -> Self {
        Self {
            status,
            data: None,
            error: None,
            is_fetching: false,
            is_fetching_more: false,
            is_stale: true,
            can_fetch_more: false,
            failure_count: 0,
            updated_at: None,
            pages: Vec::new(),
        }
    }

    /// Returns the data if any has been loaded.
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.status, QueryStatus::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
            is_fetching_more: self.is_fetching_more,
            is_stale: self.is_stale,
            can_fetch_more: self.can_fetch_more,
            failure_count: self.failure_count,
            updated_at: self.updated_at,
            pages: self.pages.clone(),
        }
    }
}
