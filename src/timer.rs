//! Cancellable timers backing retry, staleness, garbage collection and
//! refetch intervals.
//!
//! Every timer is a spawned tokio task tied to a [`CancellationToken`].
//! Dropping the [`Timer`] handle cancels the task, so an entity that owns
//! its timers can never be fired into after it is torn down. Outside a
//! runtime (an observer dropped after shutdown) timers are inert.

use std::time::Duration;

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

fn spawn(task: impl Future<Output = ()> + Send + 'static) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => trace!("no tokio runtime, timer not scheduled"),
    }
}

/// Handle for a scheduled timer task.
#[derive(Debug)]
pub(crate) struct Timer {
    token: CancellationToken,
}

impl Timer {
    /// Runs `f` once after `delay` unless cancelled first.
    pub(crate) fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        spawn(async move {
            tokio::select! {
                () = child.cancelled() => {}
                () = sleep(delay) => f(),
            }
        });
        Self { token }
    }

    /// Runs `f` every `period` until cancelled.
    ///
    /// There is no immediate first tick, and missed ticks are skipped rather
    /// than replayed.
    pub(crate) fn every<F>(period: Duration, mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = IntervalStream::new(ticker).skip(1);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    tick = ticks.next() => match tick {
                        Some(_) => f(),
                        None => break,
                    },
                }
            }
        });
        Self { token }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
