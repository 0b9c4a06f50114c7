use super::message::Batch;
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Transport used by `QueueConsumer`. Implementations wrap a concrete queue
/// service (SQS, an in-memory test double, ...).
pub trait QueueClient: Send + Sync + 'static {
    /// Receives up to `max_messages`, long-polling for at most `wait_time`.
    fn receive<'a>(
        &'a self,
        queue_url: &'a str,
        max_messages: usize,
        wait_time: Duration,
    ) -> QueueFuture<'a, Batch>;

    /// Deletes the message identified by `ack_token`.
    fn acknowledge<'a>(&'a self, queue_url: &'a str, ack_token: &'a str) -> QueueFuture<'a, ()>;
}

impl<C: QueueClient + ?Sized> QueueClient for Arc<C> {
    fn receive<'a>(
        &'a self,
        queue_url: &'a str,
        max_messages: usize,
        wait_time: Duration,
    ) -> QueueFuture<'a, Batch> {
        C::receive(self, queue_url, max_messages, wait_time)
    }

    fn acknowledge<'a>(&'a self, queue_url: &'a str, ack_token: &'a str) -> QueueFuture<'a, ()> {
        C::acknowledge(self, queue_url, ack_token)
    }
}
