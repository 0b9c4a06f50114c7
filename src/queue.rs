//! Message-queue adapter that drives a `Poller<Batch>` with a receive call and
//! acknowledges every delivered message individually.

pub mod backlog;
pub mod client;
pub mod consumer;
pub mod dispatch;
pub mod message;
pub mod receive;
