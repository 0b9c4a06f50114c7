use super::backlog::Backlog;
use super::client::QueueClient;
use super::message::Batch;
use crate::poller::producer::{Producer, ProducerFuture};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// Producer bound to one queue: every turn is a single receive call.
pub struct ReceiveBatch<C: QueueClient> {
    client: Arc<C>,
    queue_url: Arc<str>,
    max_messages: usize,
    wait_time: Duration,
    backlog: Option<Backlog>,
}

impl<C: QueueClient> ReceiveBatch<C> {
    pub fn new(client: Arc<C>, queue_url: impl Into<Arc<str>>, max_messages: usize, wait_time: Duration) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            max_messages,
            wait_time,
            backlog: None,
        }
    }

    /// Holds each receive until `backlog` has room for a full batch.
    pub fn with_backlog(mut self, backlog: Backlog) -> Self {
        self.backlog = Some(backlog);
        self
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

impl<C: QueueClient> Producer<Batch> for ReceiveBatch<C> {
    fn produce(&self) -> ProducerFuture<Batch> {
        let client = self.client.clone();
        let queue_url = self.queue_url.clone();
        let max_messages = self.max_messages;
        let wait_time = self.wait_time;
        let backlog = self.backlog.clone();

        Box::pin(async move {
            if let Some(backlog) = backlog {
                backlog.reserve().await?;
            }

            client
                .receive(&queue_url, max_messages, wait_time)
                .await
                .with_context(|| format!("failed to receive messages from {queue_url}"))
        })
    }
}
