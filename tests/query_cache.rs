// Integration tests for query deduplication, retries, staleness and garbage collection

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use refetch::config::{ErrorHook, QueryHooks, SettledHook, SuccessHook};
use refetch::prelude::*;
use serde_json::json;
use tokio::time::{Duration, Instant, sleep};

fn counting(calls: Arc<AtomicU32>, delay: Duration) -> Fetcher<u32> {
    query_fn(move |_| {
        let calls = calls.clone();
        async move {
            sleep(delay).await;
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_equal_keys_mount_concurrently_with_one_fetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));

    let first = client
        .observe(QueryArgs::new(
            json!(["todos", {"status": "done", "page": 1}]),
            counting(calls.clone(), Duration::from_millis(50)),
        ))
        .unwrap();
    let second = client
        .observe(QueryArgs::new(
            json!(["todos", {"page": 1, "status": "done"}]),
            counting(calls.clone(), Duration::from_millis(50)),
        ))
        .unwrap();

    assert!(Arc::ptr_eq(first.query(), second.query()));
    futures::join!(first.refetch(), second.refetch());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.state().data(), Some(&1));
    assert_eq!(second.state().data(), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds_with_default_retry() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let attempts = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let counter = calls.clone();
    let log = attempts.clone();
    let fetcher = query_fn(move |_| {
        let counter = counter.clone();
        let log = log.clone();
        async move {
            log.lock().push(Instant::now());
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(QueryError::NetworkError("connection reset".into())),
                _ => Ok("loaded"),
            }
        }
    });

    let observer = client.observe(QueryArgs::new("flaky", fetcher)).unwrap();
    observer.refetch().await;

    let state = observer.state();
    assert!(state.is_success());
    assert_eq!(state.data(), Some(&"loaded"));
    assert!(state.error.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let attempts = attempts.lock();
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(1000));
    assert_eq!(attempts[2] - attempts[1], Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_failure_count_is_observable_during_retries() {
    let client = QueryClient::new();
    let counts = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = counts.clone();
    let fetcher = query_fn(|_| async { Err::<u32, _>(QueryError::fetch("down")) });
    let options = QueryOptions::new().overrides(QueryOverrides::new().retry(2u32));

    let observer = client
        .watch(QueryArgs::KeyFetcherOptions("down", fetcher, options), move |state| {
            seen.lock().push(state.failure_count);
        })
        .unwrap();
    observer.refetch().await;

    let state = observer.state();
    assert!(state.is_error());
    assert_eq!(state.failure_count, 3);
    assert_eq!(state.error, Some(QueryError::FetchError("down".into())));
    let counts = counts.lock();
    assert!(counts.contains(&1) && counts.contains(&2));
    assert_eq!(counts.last(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn test_equal_data_keeps_reference_and_advances_updated_at() {
    let client = QueryClient::new();
    let fetcher = query_fn(|_| async { Ok(vec![1, 2, 3]) });
    let options = QueryOptions::new()
        .stale_time(Some(Duration::from_secs(10)))
        .compare_eq();

    let observer = client
        .observe(QueryArgs::KeyFetcherOptions("list", fetcher, options))
        .unwrap();
    observer.refetch().await;
    let before = observer.state();

    sleep(Duration::from_secs(15)).await;
    assert!(observer.state().is_stale);
    observer.refetch().await;
    let after = observer.state();

    assert!(Arc::ptr_eq(
        before.data.as_ref().unwrap(),
        after.data.as_ref().unwrap()
    ));
    assert!(after.updated_at > before.updated_at);
    assert!(!after.is_stale);
}

#[tokio::test(start_paused = true)]
async fn test_unequal_data_replaces_reference() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().compare_eq();

    let observer = client
        .observe(QueryArgs::KeyFetcherOptions(
            "changing",
            counting(calls, Duration::ZERO),
            options,
        ))
        .unwrap();
    observer.refetch().await;
    let before = observer.state();
    observer.refetch().await;
    let after = observer.state();

    assert!(!Arc::ptr_eq(
        before.data.as_ref().unwrap(),
        after.data.as_ref().unwrap()
    ));
    assert_eq!(after.data(), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_unobserved_twice_does_not_fetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().stale_time(None);

    client
        .prefetch(QueryArgs::KeyFetcherOptions(
            "idle",
            counting(calls.clone(), Duration::from_millis(10)),
            options,
        ))
        .unwrap()
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let filter = QueryFilter::exact(&"idle").unwrap();
    assert_eq!(client.invalidate(&filter), 1);
    assert_eq!(client.invalidate(&filter), 1);
    sleep(Duration::from_secs(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.is_fetching(), 0);
    let query = client.get_query::<u32, _>(&"idle").unwrap().unwrap();
    assert!(query.state().is_stale);

    // The deferred refetch happens on the next subscription.
    let observer = client.observe::<_, u32>(QueryArgs::Key("idle")).unwrap();
    observer.refetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_query_is_collected_after_cache_time() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().cache_time(Some(Duration::from_secs(60)));

    let observer = client
        .observe(QueryArgs::KeyFetcherOptions(
            "gc",
            counting(calls, Duration::ZERO),
            options,
        ))
        .unwrap();
    observer.refetch().await;
    drop(observer);
    assert_eq!(client.len(), 1);

    sleep(Duration::from_secs(59)).await;
    assert_eq!(client.len(), 1);

    sleep(Duration::from_secs(2)).await;
    assert!(client.is_empty());
    assert!(client.get_query::<u32, _>(&"gc").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribed_query_is_retained() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().cache_time(Some(Duration::from_secs(60)));

    let observer = client
        .observe(QueryArgs::KeyFetcherOptions(
            "kept",
            counting(calls, Duration::ZERO),
            options,
        ))
        .unwrap();
    observer.refetch().await;
    let query = Arc::clone(observer.query());
    drop(observer);

    sleep(Duration::from_secs(30)).await;
    let again = client.observe::<_, u32>(QueryArgs::Key("kept")).unwrap();
    assert!(Arc::ptr_eq(&query, again.query()));

    sleep(Duration::from_secs(600)).await;
    assert_eq!(client.len(), 1);
    assert_eq!(again.state().data(), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn test_clear_cancels_pending_work() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().overrides(
        QueryOverrides::new().refetch_interval(Some(Duration::from_secs(1))),
    );

    let observer = client
        .observe(QueryArgs::KeyFetcherOptions(
            "ticking",
            counting(calls.clone(), Duration::from_millis(500)),
            options,
        ))
        .unwrap();
    assert!(observer.query().is_fetching());

    client.clear();
    assert!(client.is_empty());
    sleep(Duration::from_secs(10)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!observer.state().is_fetching);
}

type Log = Arc<Mutex<Vec<String>>>;

fn recording_hooks(log: &Log) -> QueryHooks {
    let seen = log.clone();
    let on_success: SuccessHook =
        Arc::new(move |key: &QueryKey, data: &(dyn Any + Send + Sync)| {
            let data = data.downcast_ref::<u32>().copied();
            seen.lock().push(format!("cache:success:{key}:{data:?}"));
        });
    let seen = log.clone();
    let on_error: ErrorHook = Arc::new(move |key: &QueryKey, _: &QueryError| {
        seen.lock().push(format!("cache:error:{key}"));
    });
    let seen = log.clone();
    let on_settled: SettledHook = Arc::new(move |key: &QueryKey, error: Option<&QueryError>| {
        seen.lock().push(format!("cache:settled:{key}:{}", error.is_some()));
    });
    QueryHooks {
        on_success: Some(on_success),
        on_error: Some(on_error),
        on_settled: Some(on_settled),
    }
}

fn recording_options(log: &Log, name: &'static str) -> QueryOptions<u32> {
    let (success, error, settled) = (log.clone(), log.clone(), log.clone());
    QueryOptions::new()
        .overrides(
            QueryOverrides::new()
                .retry(1u32)
                .retry_delay(RetryDelay::Fixed(Duration::from_millis(10))),
        )
        .on_success(move |data: &u32| success.lock().push(format!("{name}:success:{data}")))
        .on_error(move |_: &QueryError| error.lock().push(format!("{name}:error")))
        .on_settled(move |data: Option<&u32>, error: Option<&QueryError>| {
            settled.lock().push(format!("{name}:settled:{data:?}:{}", error.is_some()));
        })
}

async fn settle_with_two_observers(fetcher: Fetcher<u32>) -> Vec<String> {
    let log: Log = Arc::default();
    let client = QueryClient::new().scoped(&QueryOverrides::new().hooks(recording_hooks(&log)));

    let first = client
        .observe(QueryArgs::KeyFetcherOptions(
            "callbacks",
            fetcher.clone(),
            recording_options(&log, "first"),
        ))
        .unwrap();
    let second = client
        .observe(QueryArgs::KeyFetcherOptions(
            "callbacks",
            fetcher,
            recording_options(&log, "second"),
        ))
        .unwrap();
    second.refetch().await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(first.query().observer_count(), 2);
    log.lock().clone()
}

#[tokio::test(start_paused = true)]
async fn test_success_callbacks_run_cache_level_first() {
    let fetcher = query_fn(|_| async {
        sleep(Duration::from_millis(10)).await;
        Ok(5u32)
    });

    let log = settle_with_two_observers(fetcher).await;

    assert_eq!(
        log,
        [
            r#"cache:success:["callbacks"]:Some(5)"#,
            "first:success:5",
            "second:success:5",
            r#"cache:settled:["callbacks"]:false"#,
            "first:settled:Some(5):false",
            "second:settled:Some(5):false",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_error_callbacks_run_once_after_retries_are_exhausted() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    let fetcher = query_fn(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(QueryError::fetch("down")) }
    });

    let log = settle_with_two_observers(fetcher).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        log,
        [
            r#"cache:error:["callbacks"]"#,
            "first:error",
            "second:error",
            r#"cache:settled:["callbacks"]:true"#,
            "first:settled:None:true",
            "second:settled:None:true",
        ]
    );
}
