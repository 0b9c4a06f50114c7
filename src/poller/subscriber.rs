//! Callback bundle registered through `subscribe`, plus the error channel that
//! every failure in the loop (and in the queue adapter) is routed through.

use crate::error::PollError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type NextHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(PollError) + Send + Sync>;
pub type CompleteHandler = Arc<dyn Fn() + Send + Sync>;

/// The single downstream consumer of a poller.
pub struct Subscriber<T> {
    pub(crate) on_next: NextHandler<T>,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) on_complete: Option<CompleteHandler>,
}

impl<T> Subscriber<T> {
    pub fn new(on_next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            on_next: Arc::new(on_next),
            on_error: None,
            on_complete: None,
        }
    }

    pub fn on_error(mut self, on_error: impl Fn(PollError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn with_error_handler(mut self, on_error: Option<ErrorHandler>) -> Self {
        self.on_error = on_error;
        self
    }

    /// Invoked once when the subscription is ended by `stop` or `destroy`.
    pub fn on_complete(mut self, on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(on_complete));
        self
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            on_next: Arc::clone(&self.on_next),
            on_error: self.on_error.clone(),
            on_complete: self.on_complete.clone(),
        }
    }
}

/// Resolved error channel. Without a handler errors are logged and dropped.
#[derive(Clone, Default)]
pub struct ErrorReporter {
    handler: Option<ErrorHandler>,
}

impl ErrorReporter {
    pub fn new(handler: Option<ErrorHandler>) -> Self {
        Self { handler }
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn report(&self, error: PollError) {
        let Some(handler) = self.handler.as_ref() else {
            tracing::warn!(error = %error, "poll error dropped; no error handler registered");
            return;
        };

        let result = catch_unwind(AssertUnwindSafe(|| handler(error)));
        if let Err(panic_payload) = result {
            tracing::error!(
                panic = %panic_message(panic_payload.as_ref()),
                "error handler panicked"
            );
        }
    }
}

/// Hands `value` to `on_next`, converting a panic into a subscriber error.
pub(crate) fn deliver<T>(on_next: &NextHandler<T>, value: T) -> Result<(), PollError> {
    catch_unwind(AssertUnwindSafe(|| on_next(value))).map_err(|panic_payload| {
        let panic_msg = panic_message(panic_payload.as_ref());
        PollError::Subscriber(anyhow::anyhow!("subscriber panicked: {panic_msg}"))
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
