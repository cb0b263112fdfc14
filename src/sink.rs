//! Batched acknowledgment sink.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;

use crate::client::QueueClient;
use crate::config::SinkConfig;
use crate::error::Error;
use crate::message::Message;

/// The capacity of the sink events channel.
const EVENTS_CAPACITY: usize = 1000;

/// An event observable by a sink's owner.
#[derive(Clone, Debug)]
pub enum SinkEvent {
    /// A message was accepted and is awaiting its batch.
    DeletePending(String),
    /// A batch of messages was deleted from the remote queue.
    Deleted(Vec<String>),
    /// A batch delete failed; the listed messages remain unacknowledged.
    DeleteError(Arc<Error>, Vec<String>),
    /// A message was rejected for lacking an identifier.
    ValidationError(Arc<Error>),
}

/// The outcome of an acknowledgment or flush.
#[derive(Clone, Debug)]
pub enum AckOutcome {
    /// The message is buffered awaiting a full batch.
    Pending,
    /// A batch was deleted from the remote queue.
    Deleted(Vec<String>),
    /// The message was rejected, or its batch failed to be deleted.
    Failed(Arc<Error>),
    /// There was nothing to flush.
    Empty,
}

/// Counters of a sink's activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Messages deleted from the remote queue.
    pub deleted: usize,
    /// Messages whose batch delete failed.
    pub failed: usize,
    /// Messages rejected for lacking an identifier.
    pub rejected: usize,
}

/// A type capable of acknowledging consumed messages.
#[async_trait]
pub trait AckSink: Send {
    /// Acknowledge a consumed message.
    async fn acknowledge(&mut self, msg: Message) -> AckOutcome;

    /// Force acknowledgment of any buffered messages.
    async fn flush(&mut self) -> AckOutcome;
}

/// A sink which deletes consumed messages from a remote queue in batches.
pub struct Sink {
    client: Arc<dyn QueueClient>,
    batch_size: usize,
    /// IDs of accepted messages awaiting their batch, oldest first.
    pending: Vec<String>,
    events: broadcast::Sender<SinkEvent>,
    stats: SinkStats,
}

impl Sink {
    /// Create a new instance.
    pub fn new(client: Arc<dyn QueueClient>, config: SinkConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            client,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            events,
            stats: SinkStats::default(),
        }
    }

    /// Subscribe to this sink's events.
    pub fn events(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }

    /// The number of accepted messages awaiting their batch.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The batch size of this sink.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Counters of this sink's activity.
    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    /// Acknowledge every message of the given stream, flushing the final partial batch once the
    /// stream ends.
    pub async fn drain<S>(&mut self, stream: S) -> SinkStats
    where
        S: Stream<Item = Message> + Send,
    {
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            self.acknowledge(msg).await;
        }
        self.flush().await;
        self.stats
    }

    /// Delete the given IDs in one call.
    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn delete(&mut self, ids: Vec<String>) -> AckOutcome {
        match self.client.ack_batch(&ids).await {
            Ok(()) => {
                tracing::debug!("deleted messages");
                self.stats.deleted += ids.len();
                let _ = self.events.send(SinkEvent::Deleted(ids.clone()));
                AckOutcome::Deleted(ids)
            }
            Err(source) => {
                tracing::error!(error = ?source, "error deleting messages");
                self.stats.failed += ids.len();
                let err = Arc::new(Error::Ack { ids: ids.clone(), source });
                let _ = self.events.send(SinkEvent::DeleteError(err.clone(), ids));
                AckOutcome::Failed(err)
            }
        }
    }
}

#[async_trait]
impl AckSink for Sink {
    async fn acknowledge(&mut self, msg: Message) -> AckOutcome {
        let id = match msg.id() {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("rejecting message without an id");
                self.stats.rejected += 1;
                let err = Arc::new(Error::Validation(Box::new(msg)));
                let _ = self.events.send(SinkEvent::ValidationError(err.clone()));
                return AckOutcome::Failed(err);
            }
        };
        self.pending.push(id.clone());
        let _ = self.events.send(SinkEvent::DeletePending(id));
        if self.pending.len() < self.batch_size {
            return AckOutcome::Pending;
        }

        let ids: Vec<String> = self.pending.drain(..self.batch_size).collect();
        self.delete(ids).await
    }

    async fn flush(&mut self) -> AckOutcome {
        if self.pending.is_empty() {
            return AckOutcome::Empty;
        }
        let ids = std::mem::take(&mut self.pending);
        self.delete(ids).await
    }
}
