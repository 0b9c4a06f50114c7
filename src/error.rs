use anyhow::Error as AnyError;
use std::fmt;

/// Failure raised while acknowledging a single delivered message.
#[derive(Debug)]
pub enum AckError {
    /// The message carried no acknowledgment token, so it cannot be deleted.
    MissingToken { message_id: Option<String> },
    /// The queue client refused or failed the acknowledge call.
    Rejected {
        message_id: Option<String>,
        source: AnyError,
    },
}

impl AckError {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            AckError::MissingToken { message_id } | AckError::Rejected { message_id, .. } => {
                message_id.as_deref()
            }
        }
    }
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.message_id().unwrap_or("<unknown>");
        match self {
            AckError::MissingToken { .. } => {
                write!(f, "message {id} has no acknowledgment token")
            }
            AckError::Rejected { source, .. } => {
                write!(f, "acknowledging message {id} failed: {source:#}")
            }
        }
    }
}

impl std::error::Error for AckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AckError::MissingToken { .. } => None,
            AckError::Rejected { source, .. } => Some(source.as_ref()),
        }
    }
}

/// Everything that can flow through a poller's error channel.
///
/// Timeouts are deliberately absent: a turn that times out is a normal outcome
/// and is absorbed by the run loop.
#[derive(Debug)]
pub enum PollError {
    /// The producer's fetch failed.
    Producer(AnyError),
    /// A downstream callback failed or panicked while handling a delivered value.
    Subscriber(AnyError),
    /// A delivered message could not be acknowledged.
    Acknowledgment(AckError),
    /// `subscribe` was called on a destroyed poller.
    Destroyed,
    /// `subscribe` was called outside of a tokio runtime.
    NoRuntime,
}

impl PollError {
    pub fn is_producer(&self) -> bool {
        matches!(self, PollError::Producer(_))
    }

    pub fn is_subscriber(&self) -> bool {
        matches!(self, PollError::Subscriber(_))
    }

    pub fn is_acknowledgment(&self) -> bool {
        matches!(self, PollError::Acknowledgment(_))
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Producer(err) => write!(f, "producer failed: {err:#}"),
            PollError::Subscriber(err) => write!(f, "subscriber failed: {err:#}"),
            PollError::Acknowledgment(err) => fmt::Display::fmt(err, f),
            PollError::Destroyed => write!(f, "poller has been destroyed"),
            PollError::NoRuntime => write!(f, "no tokio runtime available to drive the poll loop"),
        }
    }
}

impl std::error::Error for PollError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Producer(err) | PollError::Subscriber(err) => Some(err.as_ref()),
            PollError::Acknowledgment(err) => Some(err),
            PollError::Destroyed | PollError::NoRuntime => None,
        }
    }
}

impl From<AckError> for PollError {
    fn from(err: AckError) -> Self {
        PollError::Acknowledgment(err)
    }
}
