use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Delay applied between consecutive producer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ErrorBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }
}

/// Tracks the delay for the current streak of producer errors.
#[derive(Debug)]
pub(crate) struct BackoffState {
    config: ErrorBackoff,
    current: Option<Duration>,
}

impl BackoffState {
    pub(crate) fn new(config: ErrorBackoff) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Returns the delay to wait after this failure and advances the streak.
    pub(crate) fn on_error(&mut self) -> Duration {
        let delay = match self.current {
            None => self.config.initial_delay,
            Some(current) => next_backoff(current, self.config.max_delay),
        };
        self.current = Some(delay);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

/// Sleeps for `delay` unless `cancellation` fires first. Returns `false` when
/// cancelled.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !cancellation.is_cancelled();
    }

    tokio::select! {
        _ = cancellation.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
