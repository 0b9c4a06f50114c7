//! Per-batch fan-out: every message in a delivered batch is handled and then
//! acknowledged independently of its siblings.

use super::backlog::Backlog;
use super::client::QueueClient;
use super::message::{Batch, Message};
use crate::error::{AckError, PollError};
use crate::poller::subscriber::{panic_message, ErrorReporter};
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use core::future::Future;
use core::pin::Pin;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// User callback invoked with each message body.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, body: String) -> HandlerFuture;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, body: String) -> HandlerFuture {
        Box::pin(self(body))
    }
}

/// When a message is acknowledged relative to its handler's outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge after every handler attempt, whether it succeeded or not.
    #[default]
    Always,
    /// Acknowledge only after the handler succeeded; failed messages are left
    /// for the queue to redeliver.
    OnSuccess,
}

/// Tally of one settled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub messages: usize,
    pub handler_failures: usize,
    pub acknowledged: usize,
    pub ack_failures: usize,
}

#[derive(Debug, Clone, Copy)]
struct MessageOutcome {
    handled: bool,
    acknowledged: Option<bool>,
}

pub(crate) struct DispatcherParams<C: QueueClient> {
    pub client: Arc<C>,
    pub queue_url: Arc<str>,
    pub handler: Arc<dyn MessageHandler>,
    pub reporter: ErrorReporter,
    pub telemetry: Arc<Telemetry>,
    pub permits: Arc<Semaphore>,
    pub backlog: Backlog,
    pub tracker: TaskTracker,
    pub ack_policy: AckPolicy,
}

pub struct Dispatcher<C: QueueClient> {
    client: Arc<C>,
    queue_url: Arc<str>,
    handler: Arc<dyn MessageHandler>,
    reporter: ErrorReporter,
    telemetry: Arc<Telemetry>,
    permits: Arc<Semaphore>,
    backlog: Backlog,
    tracker: TaskTracker,
    ack_policy: AckPolicy,
}

impl<C: QueueClient> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            queue_url: Arc::clone(&self.queue_url),
            handler: Arc::clone(&self.handler),
            reporter: self.reporter.clone(),
            telemetry: Arc::clone(&self.telemetry),
            permits: Arc::clone(&self.permits),
            backlog: self.backlog.clone(),
            tracker: self.tracker.clone(),
            ack_policy: self.ack_policy,
        }
    }
}

impl<C: QueueClient> Dispatcher<C> {
    pub(crate) fn new(params: DispatcherParams<C>) -> Self {
        let DispatcherParams {
            client,
            queue_url,
            handler,
            reporter,
            telemetry,
            permits,
            backlog,
            tracker,
            ack_policy,
        } = params;

        Self {
            client,
            queue_url,
            handler,
            reporter,
            telemetry,
            permits,
            backlog,
            tracker,
            ack_policy,
        }
    }

    /// Hands `batch` to a tracked background task and returns immediately so
    /// the poll loop can start its next turn.
    ///
    /// The batch holds its backlog slots until it settles, so the next receive
    /// waits whenever handlers fall behind.
    pub fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        self.telemetry.record_messages_received(count as u64);
        let admitted = self.backlog.try_admit(count);
        let dispatcher = self.clone();
        self.tracker.spawn(async move {
            let _slots = match admitted {
                Some(slots) => slots,
                None => match dispatcher.backlog.admit(count).await {
                    Ok(slots) => slots,
                    Err(err) => {
                        tracing::warn!(error = %err, "backlog closed; dropping batch");
                        return;
                    }
                },
            };
            let report = dispatcher.process_batch(batch).await;
            tracing::debug!(
                queue_url = %dispatcher.queue_url,
                messages = report.messages,
                handler_failures = report.handler_failures,
                acknowledged = report.acknowledged,
                ack_failures = report.ack_failures,
                "batch settled"
            );
        });
    }

    /// Handles every message of `batch` concurrently and waits for all of them.
    pub async fn process_batch(&self, batch: Batch) -> BatchReport {
        let outcomes = join_all(
            batch
                .into_iter()
                .map(|message| self.process_message(message)),
        )
        .await;

        outcomes
            .into_iter()
            .fold(BatchReport::default(), |mut report, outcome| {
                report.messages += 1;
                if !outcome.handled {
                    report.handler_failures += 1;
                }
                match outcome.acknowledged {
                    Some(true) => report.acknowledged += 1,
                    Some(false) => report.ack_failures += 1,
                    None => {}
                }
                report
            })
    }

    async fn process_message(&self, message: Message) -> MessageOutcome {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                tracing::warn!(error = %err, "dispatch permits closed; skipping message");
                return MessageOutcome {
                    handled: false,
                    acknowledged: None,
                };
            }
        };

        let message_id = message.id().map(str::to_owned);
        let ack_token = message.ack_token().map(str::to_owned);
        let handled = self.run_handler(message.into_body(), message_id.as_deref()).await;

        if !handled && self.ack_policy == AckPolicy::OnSuccess {
            tracing::debug!(
                message_id = message_id.as_deref().unwrap_or("<unknown>"),
                "handler failed; leaving message for redelivery"
            );
            return MessageOutcome {
                handled,
                acknowledged: None,
            };
        }

        let acknowledged = match self.acknowledge(message_id, ack_token).await {
            Ok(()) => {
                self.telemetry.record_message_acknowledged();
                true
            }
            Err(err) => {
                self.telemetry.record_ack_failure();
                self.reporter.report(PollError::Acknowledgment(err));
                false
            }
        };

        MessageOutcome {
            handled,
            acknowledged: Some(acknowledged),
        }
    }

    async fn run_handler(&self, body: String, message_id: Option<&str>) -> bool {
        let handler = self.handler.clone();
        let result = AssertUnwindSafe(async move { handler.handle(body).await })
            .catch_unwind()
            .await;

        let error = match result {
            Ok(Ok(())) => return true,
            Ok(Err(err)) => err,
            Err(panic_payload) => anyhow!(
                "message handler panicked: {}",
                panic_message(panic_payload.as_ref())
            ),
        };

        let id = message_id.unwrap_or("<unknown>");
        self.telemetry.record_subscriber_failure();
        self.reporter.report(PollError::Subscriber(
            error.context(format!("handler failed for message {id}")),
        ));
        false
    }

    async fn acknowledge(
        &self,
        message_id: Option<String>,
        ack_token: Option<String>,
    ) -> Result<(), AckError> {
        let Some(ack_token) = ack_token else {
            return Err(AckError::MissingToken { message_id });
        };

        match self.client.acknowledge(&self.queue_url, &ack_token).await {
            Ok(()) => Ok(()),
            Err(source) => Err(AckError::Rejected { message_id, source }),
        }
    }
}
