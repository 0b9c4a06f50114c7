use anyhow::Result;
use core::future::Future;
use core::pin::Pin;

pub type ProducerFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Zero-argument asynchronous fetch operation invoked once per turn.
///
/// Producers are stateless from the poller's point of view. Anything they need
/// (a client handle, a resource identifier) is captured at construction.
pub trait Producer<T>: Send + Sync + 'static {
    fn produce(&self) -> ProducerFuture<T>;
}

impl<T, F, Fut> Producer<T> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn produce(&self) -> ProducerFuture<T> {
        Box::pin(self())
    }
}
