//! Queue registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::Connector;
use crate::config::{QueueConfig, SinkConfig};
use crate::queue::Queue;
use crate::sink::Sink;

/// An entry point to a remote queue service, handing out one `Queue` per queue name.
pub struct IronStream {
    connector: Arc<dyn Connector>,
    queues: HashMap<String, Queue>,
}

impl IronStream {
    /// Create a new instance which builds queue clients with the given connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            queues: Default::default(),
        }
    }

    /// Get a handle to the named queue, spawning its controller on first use.
    ///
    /// The config is only used when the queue is first created, or when replacing a queue whose
    /// controller has shut down.
    pub fn queue(&mut self, name: &str, config: QueueConfig) -> Queue {
        match self.queues.get(name) {
            Some(queue) if !queue.is_closed() => return queue.clone(),
            Some(_) => tracing::debug!(queue = name, ?config, "replacing queue whose controller has shut down"),
            None => tracing::debug!(queue = name, ?config, "creating queue"),
        }
        let queue = Queue::spawn(name, self.connector.connect(name), config);
        self.queues.insert(name.to_string(), queue.clone());
        queue
    }

    /// Build a sink which acknowledges messages consumed from the given queue.
    pub fn sink(&self, queue: &Queue, config: SinkConfig) -> Sink {
        Sink::new(queue.client(), config)
    }

    /// The names of all queues created so far.
    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }
}
