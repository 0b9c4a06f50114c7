//! Queue adapter: a [`Poller`] over [`Batch`] whose subscriber fans every
//! message out to a user handler and acknowledges it afterwards.

use super::backlog::Backlog;
use super::client::QueueClient;
use super::dispatch::{Dispatcher, DispatcherParams, MessageHandler};
use super::message::Batch;
use super::receive::ReceiveBatch;
use crate::poller::engine::Poller;
use crate::poller::subscriber::{ErrorHandler, ErrorReporter, Subscriber};
use crate::runtime::config::QueueConsumerConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct QueueConsumer<C: QueueClient> {
    config: QueueConsumerConfig,
    client: Arc<C>,
    poller: Poller<Batch>,
    permits: Arc<Semaphore>,
    backlog: Backlog,
    tracker: TaskTracker,
}

impl<C: QueueClient> QueueConsumer<C> {
    pub fn new(config: QueueConsumerConfig, client: C) -> Self {
        Self::from_shared(config, Arc::new(client))
    }

    pub fn from_shared(config: QueueConsumerConfig, client: Arc<C>) -> Self {
        let backlog = Backlog::new(config.max_in_flight(), config.max_messages());
        let producer = ReceiveBatch::new(
            client.clone(),
            config.queue_url(),
            config.max_messages(),
            config.wait_time(),
        )
        .with_backlog(backlog.clone());

        let mut poller = Poller::new(producer, config.turn_timeout());
        if let Some(backoff) = config.error_backoff() {
            poller = poller.with_error_backoff(backoff);
        }
        if let Some(interval) = config.metrics_interval() {
            poller = poller.with_metrics_interval(interval);
        }

        let turn_timeout = config.turn_timeout();
        if !turn_timeout.is_zero() && turn_timeout <= config.wait_time() {
            tracing::warn!(
                turn_timeout_ms = turn_timeout.as_millis() as u64,
                wait_time_secs = config.wait_time().as_secs(),
                "turn timeout does not exceed the receive wait time; long polls will be cut short"
            );
        }

        Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight())),
            backlog,
            config,
            client,
            poller,
            tracker: TaskTracker::new(),
        }
    }

    /// Ties the consumer to an external shutdown token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation_token(token);
        self
    }

    pub fn config(&self) -> &QueueConsumerConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.poller.telemetry()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.poller.cancellation_token()
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Number of batches still being handled or acknowledged.
    pub fn in_flight_batches(&self) -> usize {
        self.tracker.len()
    }

    /// Messages received but not yet settled. Never exceeds
    /// `max_in_flight + max_messages`; receiving pauses while it is too high
    /// to fit another batch.
    pub fn pending_messages(&self) -> usize {
        self.backlog.outstanding()
    }

    /// Starts receiving. Every message body goes to `handler`; handler,
    /// receive and acknowledgment failures go to `on_error`.
    ///
    /// Calling this while running swaps the handler for subsequent batches.
    /// Batches already dispatched finish with the handler they started with.
    pub fn subscribe(&self, handler: impl MessageHandler, on_error: Option<ErrorHandler>) {
        let dispatcher = Dispatcher::new(DispatcherParams {
            client: self.client.clone(),
            queue_url: Arc::from(self.config.queue_url()),
            handler: Arc::new(handler),
            reporter: ErrorReporter::new(on_error.clone()),
            telemetry: self.poller.telemetry(),
            permits: self.permits.clone(),
            backlog: self.backlog.clone(),
            tracker: self.tracker.clone(),
            ack_policy: self.config.ack_policy(),
        });

        self.poller.subscribe_with(
            Subscriber::new(move |batch: Batch| dispatcher.dispatch(batch))
                .with_error_handler(on_error),
        );
        tracing::info!(queue_url = %self.config.queue_url(), "queue consumer subscribed");
    }

    /// Stops receiving. Batches already dispatched still complete.
    pub fn stop(&self) {
        self.poller.stop();
    }

    pub fn destroy(&self) {
        self.poller.destroy();
    }

    /// Stops receiving, then waits for the poll loop and every dispatched batch.
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        tracing::info!(queue_url = %self.config.queue_url(), "queue consumer shut down");
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(
        &self,
        handler: impl MessageHandler,
        on_error: Option<ErrorHandler>,
    ) -> Result<()> {
        self.subscribe(handler, on_error);
        tracing::info!("queue consumer started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        let shutdown = self.poller.cancellation_token();
        let signal_result = tokio::select! {
            result = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down queue consumer");
                result
            }
            _ = shutdown.cancelled() => {
                tracing::info!("queue consumer shutdown token cancelled");
                Ok(())
            }
        };

        self.shutdown().await;
        signal_result.context("failed to listen for Ctrl-C")
    }
}
