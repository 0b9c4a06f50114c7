//! Generic polling core: producer contract, turn racing, subscriber callbacks,
//! error backoff, and the `Poller` run/stop lifecycle.

pub mod backoff;
pub mod engine;
pub(crate) mod lifecycle;
pub mod producer;
pub mod subscriber;
pub mod turn;
