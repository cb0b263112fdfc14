//! Pull-based streams and batched-acknowledgment sinks over a polled remote message queue.
//!
//! A `Queue` polls a `QueueClient` with a bounded number of concurrent fetch calls, buffers each
//! completed wave of results, and hands messages one at a time to its consumer `QueueStream`.
//! A `Sink` deletes consumed messages from the remote queue in batches.

mod client;
mod config;
mod decode;
#[cfg(test)]
mod decode_test;
mod error;
#[cfg(test)]
mod fixtures;
mod memory;
#[cfg(test)]
mod memory_test;
mod message;
mod queue;
mod sink;
mod stream;
#[cfg(test)]
mod stream_test;

pub use crate::client::{Connector, QueueClient};
pub use crate::config::{Config, QueueConfig, SinkConfig, ENV_PREFIX};
pub use crate::decode::{Enrichment, JsonDecoder};
pub use crate::error::Error;
pub use crate::memory::{MemoryBroker, MemoryQueue, QueueDump, FIELD_RESERVED_COUNT};
pub use crate::message::{Delivery, Message};
pub use crate::queue::{
    Downstream, FetcherMsg, FetcherState, Offer, PollingFetcher, PullBuffer, PullOutcome, Queue, QueueEvent, QueueStatus, QueueStream, WaveOutcome,
    WaveReceived,
};
pub use crate::sink::{AckOutcome, AckSink, Sink, SinkEvent, SinkStats};
pub use crate::stream::IronStream;
pub use async_trait::async_trait;
