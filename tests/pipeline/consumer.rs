use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{init_tracing, wait_for_condition, wait_for_count, ErrorSink, Recorder};
use crate::support::mock_queue::{message, tokenless, MockQueue, ReceiveStep};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use queuepoll::{AckError, AckPolicy, Batch, PollError, QueueConsumer, QueueConsumerConfig};
use tokio::time::sleep;

const QUEUE_URL: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/orders";

fn config() -> QueueConsumerConfig {
    QueueConsumerConfig::builder()
        .queue_url(QUEUE_URL)
        .wait_time(Duration::from_millis(20))
        .error_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .build()
        .unwrap()
}

fn recording_handler(
    bodies: &Recorder<String>,
) -> impl Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
    let bodies = bodies.clone();
    move |body: String| {
        let bodies = bodies.clone();
        async move {
            bodies.push(body);
            Ok::<_, anyhow::Error>(())
        }
        .boxed()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_token_fails_only_that_message() -> Result<()> {
    init_tracing();
    let queue = Arc::new(MockQueue::new(vec![ReceiveStep::Batch(Batch::new(vec![
        message("1", "first"),
        tokenless("2", "second"),
        message("3", "third"),
    ]))]));
    let consumer = QueueConsumer::from_shared(config(), queue.clone());
    let bodies = Recorder::<String>::default();
    let errors = ErrorSink::default();

    consumer.subscribe(recording_handler(&bodies), Some(errors.handler()));
    wait_for_count(Duration::from_secs(2), "acknowledgments", 2, || queue.ack_count()).await?;
    wait_for_count(Duration::from_secs(2), "missing token error", 1, || errors.len()).await?;
    consumer.shutdown().await;

    let mut seen = bodies.values();
    seen.sort();
    assert_eq!(seen, ["first", "second", "third"]);
    assert_eq!(queue.acked(), ["rh-1", "rh-3"]);
    assert_eq!(
        errors.count(|err| matches!(
            err,
            PollError::Acknowledgment(AckError::MissingToken { message_id: Some(id) }) if id == "2"
        )),
        1
    );
    assert_eq!(errors.len(), 1);

    let snapshot = consumer.telemetry().snapshot();
    assert_eq!(snapshot.messages_received, 3);
    assert_eq!(snapshot.messages_acknowledged, 2);
    assert_eq!(snapshot.ack_failures, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn receive_failures_are_reported_and_polling_continues() -> Result<()> {
    init_tracing();
    let queue = Arc::new(MockQueue::new(vec![
        ReceiveStep::Fail("throttled"),
        ReceiveStep::Fail("throttled"),
        ReceiveStep::Batch(Batch::new(vec![message("1", "after outage")])),
    ]));
    let consumer = QueueConsumer::from_shared(config(), queue.clone());
    let bodies = Recorder::<String>::default();
    let errors = ErrorSink::default();

    consumer.subscribe(recording_handler(&bodies), Some(errors.handler()));
    wait_for_count(Duration::from_secs(2), "acknowledgment", 1, || queue.ack_count()).await?;
    consumer.shutdown().await;

    assert_eq!(bodies.values(), ["after outage"]);
    assert_eq!(errors.count(PollError::is_producer), 2);
    assert!(errors.messages().iter().all(|message| message.contains(QUEUE_URL)));
    assert_eq!(
        queue.last_request().map(|(url, max, _)| (url, max)),
        Some((QUEUE_URL.to_owned(), 10))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_acknowledgment_is_isolated() -> Result<()> {
    init_tracing();
    let queue = Arc::new(
        MockQueue::new(vec![ReceiveStep::Batch(Batch::new(vec![
            message("1", "a"),
            message("2", "b"),
        ]))])
        .reject_ack("rh-1"),
    );
    let consumer = QueueConsumer::from_shared(config(), queue.clone());
    let bodies = Recorder::<String>::default();
    let errors = ErrorSink::default();

    consumer.subscribe(recording_handler(&bodies), Some(errors.handler()));
    wait_for_condition(Duration::from_secs(2), "batch settled", || {
        queue.ack_count() == 1 && errors.len() == 1
    })
    .await?;
    consumer.shutdown().await;

    assert_eq!(queue.acked(), ["rh-2"]);
    assert_eq!(errors.count(PollError::is_acknowledgment), 1);
    assert!(errors.messages()[0].contains("receipt handle rh-1 is invalid"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_failures_follow_ack_policy() -> Result<()> {
    init_tracing();
    for (policy, expected_acks) in [
        (AckPolicy::Always, vec!["rh-bad", "rh-good"]),
        (AckPolicy::OnSuccess, vec!["rh-good"]),
    ] {
        let queue = Arc::new(MockQueue::new(vec![ReceiveStep::Batch(Batch::new(vec![
            message("bad", "poison"),
            message("good", "fine"),
        ]))]));
        let config = QueueConsumerConfig::builder()
            .queue_url(QUEUE_URL)
            .wait_time(Duration::from_millis(20))
            .ack_policy(policy)
            .build()?;
        let consumer = QueueConsumer::from_shared(config, queue.clone());
        let errors = ErrorSink::default();

        consumer.subscribe(
            |body: String| async move {
                if body == "poison" {
                    bail!("cannot decode {body}");
                }
                Ok::<_, anyhow::Error>(())
            },
            Some(errors.handler()),
        );
        wait_for_count(Duration::from_secs(2), "acknowledgments", expected_acks.len(), || {
            queue.ack_count()
        })
        .await?;
        wait_for_count(Duration::from_secs(2), "handler failure", 1, || errors.len()).await?;
        consumer.shutdown().await;

        assert_eq!(queue.acked(), expected_acks, "policy {policy:?}");
        assert_eq!(errors.count(PollError::is_subscriber), 1);
        assert!(errors.messages()[0].contains("cannot decode poison"));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_receive_beyond_turn_timeout_is_dropped() -> Result<()> {
    init_tracing();
    let queue = Arc::new(MockQueue::new(vec![
        ReceiveStep::Delayed(Duration::from_millis(200), Batch::new(vec![message("late", "late")])),
        ReceiveStep::Batch(Batch::new(vec![message("fresh", "fresh")])),
    ]));
    let config = QueueConsumerConfig::builder()
        .queue_url(QUEUE_URL)
        .wait_time(Duration::from_millis(20))
        .turn_timeout(Duration::from_millis(50))
        .build()?;
    let consumer = QueueConsumer::from_shared(config, queue.clone());
    let bodies = Recorder::<String>::default();

    consumer.subscribe(recording_handler(&bodies), None);
    wait_for_count(Duration::from_secs(2), "fresh acknowledgment", 1, || queue.ack_count()).await?;
    sleep(Duration::from_millis(250)).await;
    consumer.shutdown().await;

    assert_eq!(bodies.values(), ["fresh"]);
    assert_eq!(queue.acked(), ["rh-fresh"]);
    assert!(consumer.telemetry().timeouts() >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_and_resubscribe_resumes_receiving() -> Result<()> {
    init_tracing();
    let queue = Arc::new(MockQueue::new(vec![ReceiveStep::Batch(Batch::new(vec![
        message("1", "before"),
    ]))]));
    let consumer = QueueConsumer::from_shared(config(), queue.clone());
    let before = Recorder::<String>::default();
    let after = Recorder::<String>::default();

    consumer.subscribe(recording_handler(&before), None);
    wait_for_count(Duration::from_secs(2), "first acknowledgment", 1, || queue.ack_count()).await?;
    consumer.stop();
    assert!(!consumer.is_running());

    let calls_when_stopped = queue.receive_calls();
    sleep(Duration::from_millis(60)).await;
    assert!(queue.receive_calls() <= calls_when_stopped + 1);

    queue.push(ReceiveStep::Batch(Batch::new(vec![message("2", "after")])));
    consumer.subscribe(recording_handler(&after), None);
    wait_for_count(Duration::from_secs(2), "second acknowledgment", 2, || queue.ack_count()).await?;
    consumer.shutdown().await;

    assert_eq!(before.values(), ["before"]);
    assert_eq!(after.values(), ["after"]);
    assert_eq!(queue.acked(), ["rh-1", "rh-2"]);
    Ok(())
}
