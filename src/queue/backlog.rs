//! Backpressure between receiving and handling: caps the number of messages
//! that have been received but not yet settled.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared admission gate for received messages.
///
/// A receive call only starts once a full batch (`reserve` slots) fits, and
/// each dispatched batch holds its slots until every message in it settles.
/// Received-but-unsettled messages therefore never exceed `capacity`.
#[derive(Debug, Clone)]
pub struct Backlog {
    slots: Arc<Semaphore>,
    capacity: u32,
    reserve: u32,
}

impl Backlog {
    /// Room for `max_in_flight` messages being worked on plus one more
    /// receive of `max_messages`.
    pub fn new(max_in_flight: usize, max_messages: usize) -> Self {
        let reserve = clamp_permits(max_messages.max(1));
        let capacity = clamp_permits(max_in_flight.saturating_add(max_messages)).max(reserve);

        Self {
            slots: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            reserve,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Messages currently admitted and not yet settled.
    pub fn outstanding(&self) -> usize {
        self.capacity().saturating_sub(self.slots.available_permits())
    }

    /// Waits until a full receive fits. The slots are not held; the batch
    /// claims them through [`Backlog::admit`] once it is known how many
    /// messages actually arrived.
    pub async fn reserve(&self) -> Result<()> {
        let _slots = self
            .slots
            .acquire_many(self.reserve)
            .await
            .context("message backlog closed")?;
        Ok(())
    }

    /// Claims slots for `count` received messages, waiting for room if needed.
    pub(crate) async fn admit(&self, count: usize) -> Result<OwnedSemaphorePermit> {
        let count = clamp_permits(count).min(self.capacity);
        self.slots
            .clone()
            .acquire_many_owned(count)
            .await
            .context("message backlog closed")
    }

    /// Claims slots without waiting. Succeeds right after a `reserve` since
    /// only the poll loop takes new slots.
    pub(crate) fn try_admit(&self, count: usize) -> Option<OwnedSemaphorePermit> {
        let count = clamp_permits(count).min(self.capacity);
        self.slots.clone().try_acquire_many_owned(count).ok()
    }
}

fn clamp_permits(count: usize) -> u32 {
    let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
    count.min(max) as u32
}
