//! A single turn of the poll loop: one producer call, optionally raced against
//! a timer.

use super::producer::Producer;
use anyhow::Error as AnyError;
use std::time::Duration;
use tokio::time::timeout;

/// Largest delay the timer accepts before the turn is treated as unbounded in
/// practice (`i32::MAX` milliseconds, a little under 25 days).
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_millis(2_147_483_647);

/// Result of one producer invocation.
#[derive(Debug)]
pub enum TurnOutcome<T> {
    Value(T),
    Timeout,
    Error(AnyError),
}

impl<T> TurnOutcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, TurnOutcome::Value(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TurnOutcome::Timeout)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TurnOutcome::Error(_))
    }
}

/// Outcome of a turn that can be interrupted by `stop`/`destroy`.
pub(crate) enum TurnDecision<T> {
    Finished(TurnOutcome<T>),
    Cancelled,
}

/// Runs one turn. A zero `turn_timeout` disables the timer entirely, which is
/// what long-poll producers managing their own wait want.
///
/// When the timer wins, the producer future is dropped and its eventual value
/// is never observed.
pub async fn start_turn<T, P>(producer: &P, turn_timeout: Duration) -> TurnOutcome<T>
where
    P: Producer<T> + ?Sized,
{
    if turn_timeout.is_zero() {
        return match producer.produce().await {
            Ok(value) => TurnOutcome::Value(value),
            Err(err) => TurnOutcome::Error(err),
        };
    }

    match timeout(turn_timeout, producer.produce()).await {
        Ok(Ok(value)) => TurnOutcome::Value(value),
        Ok(Err(err)) => TurnOutcome::Error(err),
        Err(_elapsed) => TurnOutcome::Timeout,
    }
}
