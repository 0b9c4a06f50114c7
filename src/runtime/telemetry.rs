use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by a poller and the queue adapter driving it.
#[derive(Default, Debug)]
pub struct Telemetry {
    turns: AtomicU64,
    values_delivered: AtomicU64,
    timeouts: AtomicU64,
    producer_errors: AtomicU64,
    subscriber_failures: AtomicU64,
    messages_received: AtomicU64,
    messages_acknowledged: AtomicU64,
    ack_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_turn(&self) {
        self.turns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_value_delivered(&self) {
        self.values_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_error(&self) {
        self.producer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_messages_received(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.messages_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_message_acknowledged(&self) {
        self.messages_acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            turns: self.turns.load(Ordering::Relaxed),
            values_delivered: self.values_delivered.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            producer_errors: self.producer_errors.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_acknowledged: self.messages_acknowledged.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }

    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn producer_errors(&self) -> u64 {
        self.producer_errors.load(Ordering::Relaxed)
    }

    pub fn messages_acknowledged(&self) -> u64 {
        self.messages_acknowledged.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub turns: u64,
    pub values_delivered: u64,
    pub timeouts: u64,
    pub producer_errors: u64,
    pub subscriber_failures: u64,
    pub messages_received: u64,
    pub messages_acknowledged: u64,
    pub ack_failures: u64,
}

/// Spawns a background task that periodically logs turn and message counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "queuepoll::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let received_delta = current
                        .messages_received
                        .saturating_sub(last_snapshot.messages_received);
                    let acked_delta = current
                        .messages_acknowledged
                        .saturating_sub(last_snapshot.messages_acknowledged);

                    tracing::info!(
                        target: "queuepoll::metrics",
                        turns = current.turns,
                        timeouts = current.timeouts,
                        producer_errors = current.producer_errors,
                        subscriber_failures = current.subscriber_failures,
                        received = current.messages_received,
                        received_delta,
                        acknowledged = current.messages_acknowledged,
                        acknowledged_delta = acked_delta,
                        ack_failures = current.ack_failures,
                        "poller metrics snapshot"
                    );

                    last_snapshot = current;
                }
            }
        }
    })
}
