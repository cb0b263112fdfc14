//! The remote queue capability.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::message::Message;

/// A type capable of talking to a remote, poll-only message queue.
///
/// Implementations own the wire protocol. Every call is independent and may be issued
/// concurrently with other calls on the same client.
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Fetch up to `count` messages from the queue.
    ///
    /// An empty vector means the queue currently has nothing to hand out.
    async fn fetch(&self, count: u32) -> Result<Vec<Message>>;

    /// Acknowledge (delete) a single message.
    async fn ack(&self, id: &str) -> Result<()>;

    /// Acknowledge (delete) a batch of messages in one call.
    async fn ack_batch(&self, ids: &[String]) -> Result<()>;
}

/// A factory of queue clients, keyed by queue name.
pub trait Connector: Send + Sync + 'static {
    /// Build a client for the named queue.
    fn connect(&self, queue: &str) -> Arc<dyn QueueClient>;
}
