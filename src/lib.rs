pub mod error;
pub mod poller;
pub mod queue;
pub mod runtime;

pub use error::{AckError, PollError};
pub use poller::backoff::ErrorBackoff;
pub use poller::engine::Poller;
pub use poller::producer::{Producer, ProducerFuture};
pub use poller::subscriber::{CompleteHandler, ErrorHandler, ErrorReporter, NextHandler, Subscriber};
pub use poller::turn::{start_turn, TurnOutcome, DEFAULT_TURN_TIMEOUT};
pub use queue::backlog::Backlog;
pub use queue::client::{QueueClient, QueueFuture};
pub use queue::consumer::QueueConsumer;
pub use queue::dispatch::{AckPolicy, BatchReport, Dispatcher, HandlerFuture, MessageHandler};
pub use queue::message::{Batch, Message};
pub use queue::receive::ReceiveBatch;
pub use runtime::config::{
    QueueConsumerConfig, QueueConsumerConfigBuilder, QueueConsumerConfigParams,
};
pub use runtime::telemetry::{
    init_tracing, spawn_metrics_reporter, Telemetry, TelemetrySnapshot, DEFAULT_METRICS_INTERVAL,
};
