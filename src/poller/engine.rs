//! The generic poll engine.
//!
//! `Poller` repeatedly invokes its producer, races each call against the turn
//! timeout, and streams values to a single subscriber. Each `subscribe` spawns
//! a fresh run loop on the current tokio runtime, driven by a child of the
//! poller's root [`CancellationToken`]. `stop`/`destroy` cancel that token,
//! which aborts the in-flight turn as well as any error backoff.

use super::backoff::{sleep_with_cancellation, BackoffState, ErrorBackoff};
use super::lifecycle::{RunHandles, RunSpawnParams};
use super::producer::Producer;
use super::subscriber::{deliver, ErrorHandler, ErrorReporter, NextHandler, Subscriber};
use super::turn::{start_turn, TurnDecision, TurnOutcome};
use crate::error::PollError;
use crate::runtime::telemetry::Telemetry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub struct Poller<T: Send + 'static> {
    producer: Arc<dyn Producer<T>>,
    timeout: Duration,
    error_handler: Option<ErrorHandler>,
    error_backoff: Option<ErrorBackoff>,
    metrics_interval: Option<Duration>,
    telemetry: Arc<Telemetry>,
    shutdown_root: CancellationToken,
    state: Mutex<PollerState>,
}

#[derive(Default)]
struct PollerState {
    running: bool,
    destroyed: bool,
    active: Option<RunHandles>,
}

impl<T: Send + 'static> Poller<T> {
    /// Creates an idle poller. A zero `timeout` disables the per-turn timer.
    pub fn new(producer: impl Producer<T>, timeout: Duration) -> Self {
        Self::from_shared(Arc::new(producer), timeout)
    }

    pub fn from_shared(producer: Arc<dyn Producer<T>>, timeout: Duration) -> Self {
        Self {
            producer,
            timeout,
            error_handler: None,
            error_backoff: None,
            metrics_interval: None,
            telemetry: Arc::new(Telemetry::default()),
            shutdown_root: CancellationToken::new(),
            state: Mutex::new(PollerState::default()),
        }
    }

    /// Error handler used when a subscriber does not bring its own.
    pub fn with_error_handler(mut self, handler: impl Fn(PollError) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Waits between consecutive producer failures instead of retrying immediately.
    pub fn with_error_backoff(mut self, backoff: ErrorBackoff) -> Self {
        self.error_backoff = Some(backoff);
        self
    }

    /// Spawns a metrics reporter alongside every run loop.
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Derives every run token from `token`, so cancelling it ends the active
    /// run and makes later runs exit immediately.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_root = token;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    pub fn is_running(&self) -> bool {
        let state = self.lock_state();
        state.running && state.active.as_ref().is_some_and(|run| !run.is_cancelled())
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock_state().destroyed
    }

    /// Registers `on_next` (and optionally `on_error`) and starts a new run loop.
    pub fn subscribe(&self, on_next: impl Fn(T) + Send + Sync + 'static, on_error: Option<ErrorHandler>) {
        self.subscribe_with(Subscriber::new(on_next).with_error_handler(on_error));
    }

    /// Starts (or restarts) polling on behalf of `subscriber`.
    ///
    /// An already active run is retired without firing its completion callback.
    /// Failures never surface here; they go to the subscriber's error handler,
    /// falling back to the poller's own.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) {
        let Subscriber {
            on_next,
            on_error,
            on_complete,
        } = subscriber;
        let reporter = ErrorReporter::new(on_error.or_else(|| self.error_handler.clone()));

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                reporter.report(PollError::NoRuntime);
                return;
            }
        };

        let mut state = self.lock_state();
        if state.destroyed {
            drop(state);
            reporter.report(PollError::Destroyed);
            return;
        }

        if let Some(previous) = state.active.take() {
            previous.cancel();
            tracing::debug!("replacing active poll subscription");
        }

        let run_token = self.shutdown_root.child_token();
        let run_loop = RunLoop {
            producer: self.producer.clone(),
            timeout: self.timeout,
            backoff: self.error_backoff.map(BackoffState::new),
            on_next,
            reporter,
            telemetry: self.telemetry.clone(),
            run_token: run_token.clone(),
        };

        state.active = Some(RunHandles::spawn(RunSpawnParams {
            runtime: &runtime,
            run_token,
            run_loop: run_loop.run(),
            telemetry: self.telemetry.clone(),
            metrics_interval: self.metrics_interval,
            on_complete,
        }));
        state.running = true;

        tracing::debug!(timeout_ms = duration_millis(self.timeout), "poll loop started");
    }

    /// Pauses polling. `subscribe` may be called again later to resume.
    pub fn stop(&self) {
        if let Some(mut run) = self.retire(false) {
            run.complete();
            tracing::debug!("poll loop stopped");
        }
    }

    /// Stops polling for good. Later `subscribe` calls are rejected with
    /// [`PollError::Destroyed`].
    pub fn destroy(&self) {
        if let Some(mut run) = self.retire(true) {
            run.complete();
        }
        tracing::debug!("poller destroyed");
    }

    /// Stops polling and waits for the run loop task to exit.
    pub async fn shutdown(&self) {
        if let Some(mut run) = self.retire(false) {
            run.complete();
            run.join().await;
        }
    }

    fn retire(&self, destroy: bool) -> Option<RunHandles> {
        let mut state = self.lock_state();
        state.running = false;
        if destroy {
            state.destroyed = true;
        }

        let run = state.active.take();
        if let Some(run) = run.as_ref() {
            run.cancel();
        }
        run
    }

    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static> Drop for Poller<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = state.active.take() {
            run.cancel();
        }
    }
}

struct RunLoop<T> {
    producer: Arc<dyn Producer<T>>,
    timeout: Duration,
    backoff: Option<BackoffState>,
    on_next: NextHandler<T>,
    reporter: ErrorReporter,
    telemetry: Arc<Telemetry>,
    run_token: CancellationToken,
}

impl<T: Send + 'static> RunLoop<T> {
    async fn run(mut self) {
        while !self.run_token.is_cancelled() {
            let decision = tokio::select! {
                biased;
                _ = self.run_token.cancelled() => TurnDecision::Cancelled,
                outcome = start_turn(self.producer.as_ref(), self.timeout) => TurnDecision::Finished(outcome),
            };

            let TurnDecision::Finished(outcome) = decision else {
                break;
            };
            self.telemetry.record_turn();

            // A turn that resolves after stop() is dropped. Only a callback
            // already running when stop() lands can still finish.
            if self.run_token.is_cancelled() {
                break;
            }

            match outcome {
                TurnOutcome::Value(value) => {
                    self.reset_backoff();
                    match deliver(&self.on_next, value) {
                        Ok(()) => self.telemetry.record_value_delivered(),
                        Err(err) => {
                            self.telemetry.record_subscriber_failure();
                            if self.run_token.is_cancelled() {
                                tracing::debug!(error = %err, "subscriber failed after stop; not reported");
                                break;
                            }
                            self.reporter.report(err);
                        }
                    }
                }
                TurnOutcome::Timeout => {
                    self.reset_backoff();
                    self.telemetry.record_timeout();
                    tracing::trace!(timeout_ms = duration_millis(self.timeout), "turn timed out");
                }
                TurnOutcome::Error(err) => {
                    self.telemetry.record_producer_error();
                    tracing::debug!(error = %err, "producer failed");
                    self.reporter.report(PollError::Producer(err));

                    if let Some(backoff) = self.backoff.as_mut() {
                        let delay = backoff.on_error();
                        if !sleep_with_cancellation(delay, &self.run_token).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn reset_backoff(&mut self) {
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
