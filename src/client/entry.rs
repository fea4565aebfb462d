use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::key::QueryKey;
use crate::query::FetchHandle;

/// A registry entry with its data type erased.
pub(crate) trait CachedQuery: Send + Sync {
    fn cache_key(&self) -> &QueryKey;
    fn observers(&self) -> usize;
    fn fetching(&self) -> bool;
    fn invalidate_entry(self: Arc<Self>) -> bool;
    fn refetch_entry(self: Arc<Self>) -> FetchHandle;
    fn focus_entry(self: Arc<Self>);
    /// Marks the entry evicted if it has no observers. Attaching to an
    /// evicted entry fails, so this and `attach` never interleave.
    fn try_evict(&self) -> bool;
    /// Cancels the in-flight fetch and every timer.
    fn teardown(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// The map from key hash to query, shared by a client and its scopes.
pub(crate) struct Registry {
    pub(crate) queries: DashMap<String, Arc<dyn CachedQuery>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            queries: DashMap::new(),
        }
    }

    /// Copies the entry list so callers can act on entries without holding
    /// map locks.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn CachedQuery>> {
        self.queries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Garbage-collects the entry for `key` if it is still `query` and still
    /// unobserved.
    pub(crate) fn evict(&self, key: &QueryKey, query: *const ()) -> bool {
        let removed = self.queries.remove_if(key.hash(), |_, entry| {
            std::ptr::addr_eq(Arc::as_ptr(entry), query) && entry.try_evict()
        });
        match removed {
            Some((_, entry)) => {
                debug!(key = %key, "evicting unused query");
                entry.teardown();
                true
            }
            None => false,
        }
    }

    /// Removes `entry` if it is still the one registered for its key.
    pub(crate) fn remove(&self, entry: &Arc<dyn CachedQuery>) -> bool {
        let removed = self
            .queries
            .remove_if(entry.cache_key().hash(), |_, current| {
                std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(entry))
            });
        match removed {
            Some((_, entry)) => {
                entry.teardown();
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let keys: Vec<String> = self.queries.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.queries.remove(&key) {
                entry.teardown();
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for entry in self.queries.iter() {
            entry.value().teardown();
        }
    }
}
