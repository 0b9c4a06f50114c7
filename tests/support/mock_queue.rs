use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use queuepoll::{Batch, Message, QueueClient, QueueFuture};
use tokio::time::sleep;

/// One scripted answer to a receive call.
pub enum ReceiveStep {
    Batch(Batch),
    Fail(&'static str),
    Delayed(Duration, Batch),
}

/// In-memory queue client. Receive calls replay a script, then long-poll
/// empty batches; acknowledgments are recorded per token.
#[derive(Default)]
pub struct MockQueue {
    script: Mutex<VecDeque<ReceiveStep>>,
    acked: Mutex<Vec<String>>,
    rejected_tokens: Mutex<HashSet<String>>,
    receive_calls: AtomicUsize,
    last_request: Mutex<Option<(String, usize, Duration)>>,
}

impl MockQueue {
    pub fn new(script: Vec<ReceiveStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn reject_ack(self, token: &str) -> Self {
        self.rejected_tokens.lock().unwrap().insert(token.to_owned());
        self
    }

    pub fn push(&self, step: ReceiveStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn acked(&self) -> Vec<String> {
        let mut acked = self.acked.lock().unwrap().clone();
        acked.sort();
        acked
    }

    pub fn ack_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(String, usize, Duration)> {
        self.last_request.lock().unwrap().clone()
    }
}

impl QueueClient for MockQueue {
    fn receive<'a>(
        &'a self,
        queue_url: &'a str,
        max_messages: usize,
        wait_time: Duration,
    ) -> QueueFuture<'a, Batch> {
        Box::pin(async move {
            self.receive_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() =
                Some((queue_url.to_owned(), max_messages, wait_time));

            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(ReceiveStep::Batch(batch)) => Ok(batch),
                Some(ReceiveStep::Fail(reason)) => Err(anyhow!(reason)),
                Some(ReceiveStep::Delayed(delay, batch)) => {
                    sleep(delay).await;
                    Ok(batch)
                }
                None => {
                    sleep(wait_time).await;
                    Ok(Batch::empty())
                }
            }
        })
    }

    fn acknowledge<'a>(&'a self, _queue_url: &'a str, ack_token: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            if self.rejected_tokens.lock().unwrap().contains(ack_token) {
                return Err(anyhow!("receipt handle {ack_token} is invalid"));
            }
            self.acked.lock().unwrap().push(ack_token.to_owned());
            Ok(())
        })
    }
}

pub fn message(id: &str, body: &str) -> Message {
    Message::new(body)
        .with_id(id)
        .with_ack_token(format!("rh-{id}"))
}

pub fn tokenless(id: &str, body: &str) -> Message {
    Message::new(body).with_id(id)
}
