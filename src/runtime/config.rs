use crate::poller::backoff::ErrorBackoff;
use crate::poller::turn::DEFAULT_TURN_TIMEOUT;
use crate::queue::dispatch::AckPolicy;
use crate::runtime::telemetry::DEFAULT_METRICS_INTERVAL;
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_MESSAGES: usize = 10;
pub const MAX_RECEIVE_MESSAGES: usize = 10;
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);
const DEFAULT_WAIT_TIME_SECS: u64 = 10;
const DEFAULT_MAX_IN_FLIGHT: usize = 10;
const DEFAULT_ERROR_BACKOFF_INITIAL_MS: u64 = 100;
const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 5;

const ENV_QUEUE_URL: &str = "QUEUEPOLL_QUEUE_URL";
const ENV_MAX_MESSAGES: &str = "QUEUEPOLL_MAX_MESSAGES";
const ENV_WAIT_TIME_SECS: &str = "QUEUEPOLL_WAIT_TIME_SECS";
const ENV_TIMEOUT_MS: &str = "QUEUEPOLL_TIMEOUT_MS";
const ENV_MAX_IN_FLIGHT: &str = "QUEUEPOLL_MAX_IN_FLIGHT";

/// Runtime configuration for a [`QueueConsumer`](crate::QueueConsumer).
///
/// All instances must be constructed via [`QueueConsumerConfig::builder`],
/// [`QueueConsumerConfig::new`] or [`QueueConsumerConfig::from_env`] so
/// invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConsumerConfig {
    queue_url: String,
    max_messages: usize,
    wait_time: Duration,
    turn_timeout: Duration,
    max_in_flight: usize,
    ack_policy: AckPolicy,
    error_backoff_initial: Duration,
    error_backoff_max: Duration,
    metrics_interval: Option<Duration>,
}

pub struct QueueConsumerConfigParams {
    pub queue_url: String,
    pub max_messages: usize,
    pub wait_time: Duration,
    pub turn_timeout: Duration,
    pub max_in_flight: usize,
    pub ack_policy: AckPolicy,
    pub error_backoff_initial: Duration,
    pub error_backoff_max: Duration,
    pub metrics_interval: Option<Duration>,
}

impl QueueConsumerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> QueueConsumerConfigBuilder {
        QueueConsumerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: QueueConsumerConfigParams) -> Result<Self> {
        let QueueConsumerConfigParams {
            queue_url,
            max_messages,
            wait_time,
            turn_timeout,
            max_in_flight,
            ack_policy,
            error_backoff_initial,
            error_backoff_max,
            metrics_interval,
        } = params;

        let config = Self {
            queue_url: queue_url.trim().to_owned(),
            max_messages,
            wait_time,
            turn_timeout,
            max_in_flight,
            ack_policy,
            error_backoff_initial,
            error_backoff_max,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `QUEUEPOLL_*` environment variables.
    ///
    /// `QUEUEPOLL_QUEUE_URL` is required; the others fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let queue_url = env::var(ENV_QUEUE_URL).with_context(|| format!("{ENV_QUEUE_URL} is required"))?;
        let mut builder = Self::builder().queue_url(queue_url);

        if let Some(max_messages) = parse_env::<usize>(ENV_MAX_MESSAGES)? {
            builder = builder.max_messages(max_messages);
        }
        if let Some(secs) = parse_env::<u64>(ENV_WAIT_TIME_SECS)? {
            builder = builder.wait_time(Duration::from_secs(secs));
        }
        if let Some(millis) = parse_env::<u64>(ENV_TIMEOUT_MS)? {
            builder = builder.turn_timeout(Duration::from_millis(millis));
        }
        if let Some(max_in_flight) = parse_env::<usize>(ENV_MAX_IN_FLIGHT)? {
            builder = builder.max_in_flight(max_in_flight);
        }

        builder.build()
    }

    /// Queue identifier handed to every receive and acknowledge call.
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Maximum messages requested per receive call.
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Long-poll wait passed to the receive call.
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Per-turn timeout. Zero disables the timer.
    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// Upper bound on messages being handled or acknowledged at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    /// Backoff applied after receive failures, `None` when disabled.
    pub fn error_backoff(&self) -> Option<ErrorBackoff> {
        if self.error_backoff_initial.is_zero() {
            return None;
        }
        Some(ErrorBackoff::new(
            self.error_backoff_initial,
            self.error_backoff_max,
        ))
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.queue_url.trim().is_empty() {
            bail!("queue_url cannot be empty");
        }

        if self.max_messages == 0 || self.max_messages > MAX_RECEIVE_MESSAGES {
            bail!(
                "max_messages must be between 1 and {MAX_RECEIVE_MESSAGES} (got {})",
                self.max_messages
            );
        }

        if self.wait_time > MAX_WAIT_TIME {
            bail!(
                "wait_time must be at most {} seconds (got {:?})",
                MAX_WAIT_TIME.as_secs(),
                self.wait_time
            );
        }

        if self.max_in_flight == 0 {
            bail!("max_in_flight must be greater than 0");
        }

        if !self.error_backoff_initial.is_zero()
            && self.error_backoff_max < self.error_backoff_initial
        {
            bail!("error_backoff_max must not be lower than error_backoff_initial");
        }

        if self.metrics_interval.is_some_and(|interval| interval.is_zero()) {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueueConsumerConfigBuilder {
    queue_url: Option<String>,
    max_messages: Option<usize>,
    wait_time: Option<Duration>,
    turn_timeout: Option<Duration>,
    max_in_flight: Option<usize>,
    ack_policy: Option<AckPolicy>,
    error_backoff_initial: Option<Duration>,
    error_backoff_max: Option<Duration>,
    metrics_interval: Option<Duration>,
    metrics_disabled: bool,
}

impl QueueConsumerConfigBuilder {
    pub fn queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = Some(url.into());
        self
    }

    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = Some(policy);
        self
    }

    /// A zero `initial` delay disables the backoff.
    pub fn error_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.error_backoff_initial = Some(initial);
        self.error_backoff_max = Some(max);
        self
    }

    /// Overrides the metrics reporter interval (defaults to
    /// [`DEFAULT_METRICS_INTERVAL`]).
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self.metrics_disabled = false;
        self
    }

    /// Runs without the periodic metrics reporter.
    pub fn disable_metrics(mut self) -> Self {
        self.metrics_disabled = true;
        self
    }

    pub fn build(self) -> Result<QueueConsumerConfig> {
        let params = QueueConsumerConfigParams {
            queue_url: self.queue_url.context("queue_url is required")?,
            max_messages: self.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES),
            wait_time: self
                .wait_time
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_WAIT_TIME_SECS)),
            turn_timeout: self.turn_timeout.unwrap_or(DEFAULT_TURN_TIMEOUT),
            max_in_flight: self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            ack_policy: self.ack_policy.unwrap_or_default(),
            error_backoff_initial: self
                .error_backoff_initial
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_ERROR_BACKOFF_INITIAL_MS)),
            error_backoff_max: self
                .error_backoff_max
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_ERROR_BACKOFF_MAX_SECS)),
            metrics_interval: if self.metrics_disabled {
                None
            } else {
                Some(self.metrics_interval.unwrap_or(DEFAULT_METRICS_INTERVAL))
            },
        };

        QueueConsumerConfig::new(params)
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value: {raw:?}"))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{key} is not valid unicode")),
    }
}
