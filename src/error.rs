//! Ironstream error abstractions.

use thiserror::Error;

use crate::message::Message;

/// Error variants surfaced by queues, sinks and decoders.
#[derive(Debug, Error)]
pub enum Error {
    /// A fetch call against the remote queue failed.
    ///
    /// Fetch errors are fail-stop: polling halts until the owner resumes the queue.
    #[error("error fetching messages from queue: {0}")]
    Fetch(#[source] anyhow::Error),
    /// A message handed to a sink does not carry an identifier.
    #[error("message does not have an `id` property")]
    Validation(Box<Message>),
    /// A bulk delete call against the remote queue failed.
    ///
    /// The listed messages are left unacknowledged and will be redelivered by the remote queue.
    #[error("error deleting {} messages from queue: {source}", .ids.len())]
    Ack {
        ids: Vec<String>,
        #[source]
        source: anyhow::Error,
    },
    /// A message body could not be decoded.
    #[error("error decoding message: {reason}")]
    Parse { reason: String, message: Box<Message> },
    /// The consumer stream of a queue has already been taken.
    #[error("the stream of queue {0} has already been taken")]
    StreamTaken(String),
    /// The queue controller has shut down.
    #[error("queue controller has shut down")]
    Closed,
}

impl Error {
    /// The message attached to this error, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Validation(msg) | Self::Parse { message: msg, .. } => Some(&**msg),
            _ => None,
        }
    }
}
