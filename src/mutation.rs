//! Mutations: one-off writes with optimistic updates.
//!
//! A [`Mutation`] is not cached by key. Each [`Mutation::execute`] call gets
//! a fresh call id. Only the most recent call may write the shared
//! [`MutationState`]; an older call that settles later still runs its own
//! callbacks but leaves the state alone.
//!
//! The callbacks of one call run as an ordered list of async steps:
//!
//! 1. `on_mutate(variables)`, whose output is the rollback snapshot
//! 2. the mutator
//! 3. `on_success` / `on_error`, options-level then call-level
//! 4. `on_settled`, options-level then call-level
//!
//! A step that fails aborts the remaining steps and its error is returned to
//! the caller. If `on_mutate` fails, the mutator is skipped and the failure
//! path runs without a snapshot.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), refetch::error::QueryError> {
//! use refetch::mutation::{Mutation, MutationState};
//!
//! let rename = Mutation::<String, String>::new(|name: String| async move {
//!     Ok(name.to_uppercase())
//! });
//! assert_eq!(rename.execute("todo".into()).await?, Some("TODO".to_string()));
//! assert!(matches!(rename.state(), MutationState::Success(name) if name == "TODO"));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::MutationConfig;
use crate::error::QueryError;
use crate::query::QueryStatus;

/// The state of the most recent mutation call.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// No call has been made, or the mutation was reset.
    Idle,
    /// A call is in progress.
    Loading,
    /// The most recent call succeeded.
    Success(T),
    /// The most recent call failed.
    Error(QueryError),
}

impl<T> MutationState<T> {
    pub const fn status(&self) -> QueryStatus {
        match self {
            Self::Idle => QueryStatus::Idle,
            Self::Loading => QueryStatus::Loading,
            Self::Success(_) => QueryStatus::Success,
            Self::Error(_) => QueryStatus::Error,
        }
    }

    /// Returns the result data if the mutation succeeded.
    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// The future returned by a mutation callback.
pub type CallbackFuture = BoxFuture<'static, Result<(), QueryError>>;

pub type Mutator<V, O> =
    Arc<dyn Fn(V) -> BoxFuture<'static, Result<O, QueryError>> + Send + Sync>;
pub type OnMutate<V, S> =
    Arc<dyn Fn(V) -> BoxFuture<'static, Result<S, QueryError>> + Send + Sync>;
pub type OnMutationSuccess<V, O> = Arc<dyn Fn(O, V) -> CallbackFuture + Send + Sync>;
pub type OnMutationError<V, S> =
    Arc<dyn Fn(QueryError, V, Option<S>) -> CallbackFuture + Send + Sync>;
pub type OnMutationSettled<V, O, S> =
    Arc<dyn Fn(Option<O>, Option<QueryError>, V, Option<S>) -> CallbackFuture + Send + Sync>;

/// Builds a [`Mutator`] from an async closure.
pub fn mutation_fn<V, O, F, Fut>(f: F) -> Mutator<V, O>
where
    F: Fn(V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, QueryError>> + Send + 'static,
{
    Arc::new(move |variables| f(variables).boxed())
}

/// Options-level mutation callbacks.
///
/// `S` is the snapshot type returned by `on_mutate` and handed to
/// `on_error` and `on_settled` for rollback.
pub struct MutationOptions<V, O, S = ()> {
    pub on_mutate: Option<OnMutate<V, S>>,
    pub on_success: Option<OnMutationSuccess<V, O>>,
    pub on_error: Option<OnMutationError<V, S>>,
    pub on_settled: Option<OnMutationSettled<V, O, S>>,
    pub throw_on_error: Option<bool>,
    pub use_error_boundary: Option<bool>,
}

impl<V, O, S> MutationOptions<V, O, S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before the mutator; its result is the snapshot handed to the
    /// error and settled callbacks, e.g. for rolling back optimistic writes.
    #[must_use]
    pub fn on_mutate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, QueryError>> + Send + 'static,
    {
        self.on_mutate = Some(Arc::new(move |variables| f(variables).boxed()));
        self
    }

    #[must_use]
    pub fn on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(O, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |data, variables| f(data, variables).boxed()));
        self
    }

    #[must_use]
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryError, V, Option<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |error, variables, snapshot| {
            f(error, variables, snapshot).boxed()
        }));
        self
    }

    #[must_use]
    pub fn on_settled<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<O>, Option<QueryError>, V, Option<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_settled = Some(Arc::new(move |data, error, variables, snapshot| {
            f(data, error, variables, snapshot).boxed()
        }));
        self
    }

    #[must_use]
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }

    #[must_use]
    pub fn use_error_boundary(mut self, use_error_boundary: bool) -> Self {
        self.use_error_boundary = Some(use_error_boundary);
        self
    }
}

impl<V, O, S> Default for MutationOptions<V, O, S> {
    fn default() -> Self {
        Self {
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            throw_on_error: None,
            use_error_boundary: None,
        }
    }
}

impl<V, O, S> fmt::Debug for MutationOptions<V, O, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("on_mutate", &self.on_mutate.is_some())
            .field("throw_on_error", &self.throw_on_error)
            .field("use_error_boundary", &self.use_error_boundary)
            .finish_non_exhaustive()
    }
}

/// Call-level callbacks for one [`Mutation::execute_with`] call. They run
/// after the options-level callback of the same kind.
pub struct MutateOptions<V, O, S = ()> {
    pub on_success: Option<OnMutationSuccess<V, O>>,
    pub on_error: Option<OnMutationError<V, S>>,
    pub on_settled: Option<OnMutationSettled<V, O, S>>,
    pub throw_on_error: Option<bool>,
}

impl<V, O, S> MutateOptions<V, O, S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(O, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |data, variables| f(data, variables).boxed()));
        self
    }

    #[must_use]
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryError, V, Option<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |error, variables, snapshot| {
            f(error, variables, snapshot).boxed()
        }));
        self
    }

    #[must_use]
    pub fn on_settled<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<O>, Option<QueryError>, V, Option<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        self.on_settled = Some(Arc::new(move |data, error, variables, snapshot| {
            f(data, error, variables, snapshot).boxed()
        }));
        self
    }

    #[must_use]
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }
}

impl<V, O, S> Default for MutateOptions<V, O, S> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_settled: None,
            throw_on_error: None,
        }
    }
}

type Step = Box<dyn FnOnce() -> CallbackFuture + Send>;

async fn run_steps(steps: Vec<Step>) -> Result<(), QueryError> {
    for step in steps {
        step().await?;
    }
    Ok(())
}

struct Inner<V, O, S> {
    mutator: Mutator<V, O>,
    options: MutationOptions<V, O, S>,
    config: MutationConfig,
    state: watch::Sender<MutationState<O>>,
    latest_call: AtomicU64,
}

/// A mutation call site.
///
/// Clones share state and the latest-call id.
pub struct Mutation<V, O, S = ()> {
    shared: Arc<Inner<V, O, S>>,
}

impl<V, O, S> Clone for Mutation<V, O, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V, O, S> Mutation<V, O, S>
where
    V: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    /// Creates a mutation with default options.
    pub fn new<F, Fut>(mutator: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, QueryError>> + Send + 'static,
    {
        Self::with_options(
            mutation_fn(mutator),
            MutationOptions::default(),
            MutationConfig::default(),
        )
    }

    /// A mutation with options-level callbacks. `throw_on_error` and
    /// `use_error_boundary` set in `options` take precedence over `config`.
    pub fn with_options(
        mutator: Mutator<V, O>,
        options: MutationOptions<V, O, S>,
        mut config: MutationConfig,
    ) -> Self {
        if let Some(throw) = options.throw_on_error {
            config.throw_on_error = throw;
        }
        if let Some(boundary) = options.use_error_boundary {
            config.use_error_boundary = Some(boundary);
        }
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            shared: Arc::new(Inner {
                mutator,
                options,
                config,
                state,
                latest_call: AtomicU64::new(0),
            }),
        }
    }

    /// The state of the latest call.
    pub fn state(&self) -> MutationState<O> {
        self.shared.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<MutationState<O>> {
        self.shared.state.subscribe()
    }

    /// The state, or its error when errors are raised to the caller.
    pub fn result(&self) -> Result<MutationState<O>, QueryError> {
        match self.state() {
            MutationState::Error(error) if self.shared.config.throws_errors() => Err(error),
            state => Ok(state),
        }
    }

    /// Restores `Idle`. Calls still in flight no longer write state.
    pub fn reset(&self) {
        let latest_call = &self.shared.latest_call;
        self.shared.state.send_modify(|state| {
            latest_call.fetch_add(1, Ordering::SeqCst);
            *state = MutationState::Idle;
        });
    }

    /// Runs the mutation with the options-level callbacks only.
    pub async fn execute(&self, variables: V) -> Result<Option<O>, QueryError> {
        self.execute_with(variables, MutateOptions::default()).await
    }

    /// Runs the mutation with call-level callbacks.
    ///
    /// Resolves to `Ok(Some(data))` on success. On a mutator failure it
    /// resolves to `Ok(None)`, or to `Err` if `throw_on_error` is set at the
    /// call or on the mutation. A failing callback always returns `Err`.
    pub async fn execute_with(
        &self,
        variables: V,
        call: MutateOptions<V, O, S>,
    ) -> Result<Option<O>, QueryError> {
        let shared = &self.shared;
        let mut id = 0;
        shared.state.send_modify(|state| {
            id = shared.latest_call.fetch_add(1, Ordering::SeqCst) + 1;
            *state = MutationState::Loading;
        });
        debug!(call = id, "mutation started");

        let snapshot = match &shared.options.on_mutate {
            Some(on_mutate) => match on_mutate(variables.clone()).await {
                Ok(snapshot) => Some(snapshot),
                Err(error) => return self.fail(id, error, variables, None, call).await,
            },
            None => None,
        };

        match (shared.mutator)(variables.clone()).await {
            Ok(data) => {
                self.write(id, MutationState::Success(data.clone()));

                let mut steps: Vec<Step> = Vec::new();
                let on_success = [shared.options.on_success.clone(), call.on_success];
                for on_success in on_success.into_iter().flatten() {
                    let (data, variables) = (data.clone(), variables.clone());
                    steps.push(Box::new(move || on_success(data, variables)));
                }
                let on_settled = [shared.options.on_settled.clone(), call.on_settled];
                for on_settled in on_settled.into_iter().flatten() {
                    let (data, variables) = (data.clone(), variables.clone());
                    let snapshot = snapshot.clone();
                    steps.push(Box::new(move || {
                        on_settled(Some(data), None, variables, snapshot)
                    }));
                }
                run_steps(steps).await?;
                Ok(Some(data))
            }
            Err(error) => self.fail(id, error, variables, snapshot, call).await,
        }
    }

    async fn fail(
        &self,
        id: u64,
        error: QueryError,
        variables: V,
        snapshot: Option<S>,
        call: MutateOptions<V, O, S>,
    ) -> Result<Option<O>, QueryError> {
        let shared = &self.shared;
        warn!(call = id, %error, "mutation failed");
        self.write(id, MutationState::Error(error.clone()));

        let mut steps: Vec<Step> = Vec::new();
        let on_error = [shared.options.on_error.clone(), call.on_error];
        for on_error in on_error.into_iter().flatten() {
            let (error, variables) = (error.clone(), variables.clone());
            let snapshot = snapshot.clone();
            steps.push(Box::new(move || on_error(error, variables, snapshot)));
        }
        let on_settled = [shared.options.on_settled.clone(), call.on_settled];
        for on_settled in on_settled.into_iter().flatten() {
            let (error, variables) = (error.clone(), variables.clone());
            let snapshot = snapshot.clone();
            steps.push(Box::new(move || {
                on_settled(None, Some(error), variables, snapshot)
            }));
        }
        run_steps(steps).await?;

        if call.throw_on_error.unwrap_or(shared.config.throw_on_error) {
            Err(error)
        } else {
            Ok(None)
        }
    }

    /// Writes `state` if call `id` is still the latest. The check runs under
    /// the channel's lock, which every change of the latest call also holds.
    fn write(&self, id: u64, state: MutationState<O>) {
        let latest_call = &self.shared.latest_call;
        let written = self.shared.state.send_if_modified(|current| {
            if latest_call.load(Ordering::SeqCst) != id {
                return false;
            }
            *current = state;
            true
        });
        if !written {
            trace!(call = id, "superseded mutation result not written");
        }
    }
}

impl<V, O, S> fmt::Debug for Mutation<V, O, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("config", &self.shared.config)
            .field("latest_call", &self.shared.latest_call.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, entry: impl Into<String>) {
        log.lock().push(entry.into());
    }

    #[tokio::test]
    async fn test_mutation_success() {
        let mutation = Mutation::<u32, u32>::new(|n| async move { Ok(n * 2) });
        assert!(mutation.state().is_idle());

        let result = mutation.execute(21).await;
        assert_eq!(result, Ok(Some(42)));
        assert_eq!(mutation.state().data(), Some(&42));
        assert_eq!(mutation.state().status(), QueryStatus::Success);
    }

    #[tokio::test]
    async fn test_mutation_error_resolves_none_by_default() {
        let mutation = Mutation::<u32, u32>::new(|_| async {
            Err(QueryError::NetworkError("offline".into()))
        });

        assert_eq!(mutation.execute(1).await, Ok(None));
        assert_eq!(
            mutation.state().error(),
            Some(&QueryError::NetworkError("offline".into()))
        );
    }

    #[tokio::test]
    async fn test_throw_on_error_call_level_wins() {
        let options = MutationOptions::<u32, u32>::new().throw_on_error(true);
        let mutation = Mutation::with_options(
            mutation_fn(|_: u32| async { Err::<u32, _>(QueryError::fetch("nope")) }),
            options,
            MutationConfig::default(),
        );

        assert!(mutation.execute(1).await.is_err());
        let quiet = MutateOptions::new().throw_on_error(false);
        assert_eq!(mutation.execute_with(1, quiet).await, Ok(None));
    }

    #[tokio::test]
    async fn test_callbacks_run_in_order() {
        let log: Log = Arc::default();
        let (a, b, c, d, e) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
        let options = MutationOptions::<u32, u32, u32>::new()
            .on_mutate(move |v| {
                let a = a.clone();
                async move {
                    record(&a, format!("mutate {v}"));
                    Ok(v + 100)
                }
            })
            .on_success(move |data, _| {
                let b = b.clone();
                async move {
                    record(&b, format!("success {data}"));
                    Ok(())
                }
            })
            .on_settled(move |data, _, _, snapshot| {
                let c = c.clone();
                async move {
                    record(&c, format!("settled {data:?} {snapshot:?}"));
                    Ok(())
                }
            });
        let mutation = Mutation::with_options(
            mutation_fn(|v: u32| async move { Ok(v + 1) }),
            options,
            MutationConfig::default(),
        );

        let call = MutateOptions::new()
            .on_success(move |_, _| {
                let d = d.clone();
                async move {
                    record(&d, "call success");
                    Ok(())
                }
            })
            .on_settled(move |_, _, _, _| {
                let e = e.clone();
                async move {
                    record(&e, "call settled");
                    Ok(())
                }
            });
        assert_eq!(mutation.execute_with(1, call).await, Ok(Some(2)));

        assert_eq!(
            *log.lock(),
            vec![
                "mutate 1",
                "success 2",
                "call success",
                "settled Some(2) Some(101)",
                "call settled",
            ]
        );
    }

    #[tokio::test]
    async fn test_error_callbacks_receive_snapshot() {
        let log: Log = Arc::default();
        let seen = log.clone();
        let options = MutationOptions::<u32, u32, &'static str>::new()
            .on_mutate(|_| async { Ok("before") })
            .on_error(move |error, _, snapshot| {
                let seen = seen.clone();
                async move {
                    record(&seen, format!("rollback to {snapshot:?} after {error}"));
                    Ok(())
                }
            });
        let mutation = Mutation::with_options(
            mutation_fn(|_: u32| async { Err::<u32, _>(QueryError::fetch("conflict")) }),
            options,
            MutationConfig::default(),
        );

        assert_eq!(mutation.execute(1).await, Ok(None));
        assert_eq!(
            *log.lock(),
            vec![r#"rollback to Some("before") after Fetch failed: conflict"#]
        );
    }

    #[tokio::test]
    async fn test_failing_on_mutate_skips_mutator() {
        let log: Log = Arc::default();
        let (called, errored) = (log.clone(), log.clone());
        let options = MutationOptions::<u32, u32>::new()
            .on_mutate(|_| async { Err(QueryError::callback("no snapshot")) })
            .on_error(move |_, _, snapshot| {
                let errored = errored.clone();
                async move {
                    record(&errored, format!("error {snapshot:?}"));
                    Ok(())
                }
            });
        let mutation = Mutation::with_options(
            mutation_fn(move |v: u32| {
                record(&called, "mutator");
                async move { Ok(v) }
            }),
            options,
            MutationConfig::default(),
        );

        assert_eq!(mutation.execute(1).await, Ok(None));
        assert_eq!(*log.lock(), vec!["error None"]);
        assert!(mutation.state().is_error());
    }

    #[tokio::test]
    async fn test_callback_error_aborts_and_propagates() {
        let log: Log = Arc::default();
        let settled = log.clone();
        let options = MutationOptions::<u32, u32>::new()
            .on_success(|_, _| async { Err(QueryError::callback("handler broke")) })
            .on_settled(move |_, _, _, _| {
                let settled = settled.clone();
                async move {
                    record(&settled, "settled");
                    Ok(())
                }
            });
        let mutation = Mutation::with_options(
            mutation_fn(|v: u32| async move { Ok(v) }),
            options,
            MutationConfig::default(),
        );

        assert_eq!(
            mutation.execute(1).await,
            Err(QueryError::Callback("handler broke".to_string()))
        );
        assert!(log.lock().is_empty());
        // State was written before the callbacks ran.
        assert_eq!(mutation.state().data(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_blocks_in_flight_write() {
        let mutation = Mutation::<u32, u32>::new(|v| async move {
            sleep(Duration::from_millis(100)).await;
            Ok(v)
        });
        let running = mutation.clone();
        let call = tokio::spawn(async move { running.execute(5).await });

        sleep(Duration::from_millis(10)).await;
        assert!(mutation.state().is_loading());
        mutation.reset();

        assert_eq!(call.await.unwrap(), Ok(Some(5)));
        assert!(mutation.state().is_idle());
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let mutation = Mutation::<u32, u32>::new(|v| async move { Ok(v) });
        let mut rx = mutation.subscribe();
        assert!(rx.borrow_and_update().is_idle());

        mutation.execute(3).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().data(), Some(&3));
    }

    #[tokio::test]
    async fn test_result_raises_with_error_boundary() {
        let options = MutationOptions::<u32, u32>::new().use_error_boundary(true);
        let mutation = Mutation::with_options(
            mutation_fn(|_: u32| async { Err::<u32, _>(QueryError::fetch("boom")) }),
            options,
            MutationConfig::default(),
        );
        mutation.execute(1).await.unwrap();
        assert_eq!(mutation.result(), Err(QueryError::FetchError("boom".to_string())));
    }
}
