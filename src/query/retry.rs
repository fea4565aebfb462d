use tokio::time::sleep;
use tracing::debug;

use crate::config::{Retry, RetryDelay};
use crate::error::QueryError;

use super::options::{FetchContext, Fetcher};

/// Invokes `fetcher` until it succeeds or the retry policy gives up.
///
/// `on_failure` sees every failure with the running failure count before the
/// policy is consulted.
pub(crate) async fn fetch_with_retry<T, F>(
    fetcher: &Fetcher<T>,
    ctx: FetchContext,
    retry: &Retry,
    retry_delay: &RetryDelay,
    mut on_failure: F,
) -> Result<T, QueryError>
where
    F: FnMut(u32),
{
    let mut failure_count = 0u32;
    loop {
        match fetcher(ctx.clone()).await {
            Ok(data) => return Ok(data),
            Err(error) => {
                failure_count = failure_count.saturating_add(1);
                on_failure(failure_count);

                if !retry.should_retry(failure_count, &error) {
                    return Err(error);
                }

                let delay = retry_delay.delay(failure_count - 1);
                debug!(
                    key = %ctx.key,
                    failure_count,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "query fetch failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryKey;
    use crate::query::options::query_fn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn context() -> FetchContext {
        let key = QueryKey::normalize(&"todos").unwrap();
        FetchContext {
            args: key.parts().to_vec(),
            key,
            page_param: None,
        }
    }

    fn failing_times(failures: u32, calls: Arc<AtomicU32>) -> Fetcher<u32> {
        query_fn(move |_| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(QueryError::FetchError(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_exponential_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_times(2, calls.clone());
        let mut failures = Vec::new();

        let start = Instant::now();
        let result = fetch_with_retry(
            &fetcher,
            context(),
            &Retry::Count(3),
            &RetryDelay::Exponential,
            |n| failures.push(n),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failures, vec![1, 2]);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_times(u32::MAX, calls.clone());

        let result = fetch_with_retry(
            &fetcher,
            context(),
            &Retry::Count(3),
            &RetryDelay::Fixed(Duration::from_millis(10)),
            |_| {},
        )
        .await;

        assert_eq!(result, Err(QueryError::FetchError("attempt 4".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retry_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_times(u32::MAX, calls.clone());

        let result =
            fetch_with_retry(&fetcher, context(), &Retry::Never, &RetryDelay::Exponential, |_| {})
                .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_sees_failure_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_times(u32::MAX, calls.clone());
        let retry = Retry::Predicate(Arc::new(|count: u32, _: &QueryError| count < 2));

        let _ = fetch_with_retry(
            &fetcher,
            context(),
            &retry,
            &RetryDelay::Fixed(Duration::ZERO),
            |_| {},
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
