//! An in-memory queue client.
//!
//! `MemoryQueue` behaves like a remote queue with reservations: fetched messages move from the
//! ready list into a reserved set until they are acknowledged, or until `release_reserved` is
//! called to emulate their visibility timeout expiring.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::client::{Connector, QueueClient};
use crate::message::Message;

/// The metadata field recording how many times a message has been reserved.
pub const FIELD_RESERVED_COUNT: &str = "reserved_count";

/// An in-memory queue.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueState>>,
}

#[derive(Default)]
struct MemoryQueueState {
    /// Messages available for fetching, in queue order.
    ready: VecDeque<Message>,
    /// Messages handed out by a fetch and not yet acknowledged, with their reservation sequence.
    reserved: HashMap<String, (u64, Message)>,
    /// The sequence assigned to the next reservation.
    next_seq: u64,
    /// The number of fetch calls served.
    fetch_calls: u64,
}

impl MemoryQueueState {
    /// Reserved messages in the order they were fetched.
    fn reserved_in_order(&self) -> Vec<&Message> {
        let mut reserved: Vec<&(u64, Message)> = self.reserved.values().collect();
        reserved.sort_unstable_by_key(|(seq, _)| *seq);
        reserved.into_iter().map(|(_, msg)| msg).collect()
    }
}

/// A snapshot of the contents of a `MemoryQueue`.
#[derive(Clone, Debug, Default)]
pub struct QueueDump {
    pub ready: Vec<Message>,
    pub reserved: Vec<Message>,
}

impl MemoryQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new queue holding the given messages.
    pub fn with_messages<I: IntoIterator<Item = Message>>(messages: I) -> Self {
        let queue = Self::new();
        queue.state().ready.extend(messages);
        queue
    }

    /// Push a message onto the back of the queue.
    pub fn push(&self, msg: Message) {
        self.state().ready.push_back(msg);
    }

    /// Take a snapshot of the queue's ready and reserved messages.
    pub fn dump(&self) -> QueueDump {
        let state = self.state();
        QueueDump {
            ready: state.ready.iter().cloned().collect(),
            reserved: state.reserved_in_order().into_iter().cloned().collect(),
        }
    }

    /// Return all reserved messages to the front of the ready list, as if their reservations expired.
    pub fn release_reserved(&self) -> usize {
        let mut state = self.state();
        let mut released: Vec<(u64, Message)> = std::mem::take(&mut state.reserved).into_values().collect();
        released.sort_unstable_by_key(|(seq, _)| *seq);
        let count = released.len();
        for (_, msg) in released.into_iter().rev() {
            state.ready.push_front(msg);
        }
        count
    }

    /// The number of fetch calls this queue has served.
    pub fn fetch_calls(&self) -> u64 {
        self.state().fetch_calls
    }

    fn state(&self) -> MutexGuard<'_, MemoryQueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn fetch(&self, count: u32) -> Result<Vec<Message>> {
        let mut state = self.state();
        state.fetch_calls += 1;
        let take = state.ready.len().min(count as usize);
        let mut out = Vec::with_capacity(take);
        let drained: Vec<Message> = state.ready.drain(..take).collect();
        for mut msg in drained {
            let id = match msg.id() {
                Some(id) => id.to_string(),
                None => Uuid::new_v4().to_string(),
            };
            msg.id = Some(id.clone());
            let reserved = msg.fields.get(FIELD_RESERVED_COUNT).and_then(Value::as_u64).unwrap_or(0);
            msg.fields.insert(FIELD_RESERVED_COUNT.into(), Value::from(reserved + 1));
            let seq = state.next_seq;
            state.next_seq += 1;
            state.reserved.insert(id, (seq, msg.clone()));
            out.push(msg);
        }
        tracing::trace!(requested = count, returned = out.len(), "memory queue fetch");
        Ok(out)
    }

    async fn ack(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        if state.reserved.remove(id).is_none() {
            bail!("message {} is not reserved", id);
        }
        Ok(())
    }

    async fn ack_batch(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state();
        if let Some(unknown) = ids.iter().find(|id| !state.reserved.contains_key(id.as_str())) {
            bail!("message {} is not reserved", unknown);
        }
        for id in ids {
            state.reserved.remove(id);
        }
        Ok(())
    }
}

/// A set of named in-memory queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, MemoryQueue>>>,
}

impl MemoryBroker {
    /// Get a handle to the named queue, creating it if needed.
    pub fn queue(&self, name: &str) -> MemoryQueue {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.entry(name.to_string()).or_default().clone()
    }
}

impl Connector for MemoryBroker {
    fn connect(&self, queue: &str) -> Arc<dyn QueueClient> {
        Arc::new(self.queue(queue))
    }
}
