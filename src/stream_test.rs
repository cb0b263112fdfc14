use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;

use crate::config::{QueueConfig, SinkConfig};
use crate::error::Error;
use crate::memory::MemoryBroker;
use crate::message::Message;
use crate::sink::SinkStats;
use crate::stream::IronStream;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn queue_is_memoized_per_name() -> Result<()> {
    let mut streams = IronStream::new(Arc::new(MemoryBroker::default()));

    let first = streams.queue("jobs", QueueConfig::default());
    let _stream = first.stream()?;
    let again = streams.queue("jobs", QueueConfig::default());
    let other = streams.queue("other", QueueConfig::default());

    assert!(matches!(again.stream(), Err(Error::StreamTaken(_))), "expected the same queue to be returned for the same name");
    assert!(other.stream().is_ok(), "expected a distinct queue for a distinct name");
    let mut names: Vec<&str> = streams.queue_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["jobs", "other"], "unexpected queue names");

    Ok(())
}

#[tokio::test]
async fn shut_down_queue_is_replaced_on_next_lookup() -> Result<()> {
    let broker = MemoryBroker::default();
    broker.queue("jobs").push(Message::new("after restart"));
    let mut streams = IronStream::new(Arc::new(broker));

    let first = streams.queue("jobs", QueueConfig::default());
    first.shutdown().await?;
    tokio::time::timeout(TIMEOUT, first.closed()).await.context("timeout waiting for queue controller to shut down")?;
    assert!(first.is_closed(), "expected the first queue to be closed");

    let second = streams.queue("jobs", QueueConfig::default());
    assert!(!second.is_closed(), "expected a live queue in place of the closed one");
    assert!(second.status().await.is_ok(), "expected the replacement queue to answer status requests");
    let msg = tokio::time::timeout(TIMEOUT, second.stream()?.next())
        .await
        .context("timeout waiting for a message from the replacement queue")?
        .context("replacement queue stream ended early")?;
    assert_eq!(msg.body, "after restart", "unexpected message body");
    assert_eq!(streams.queue_names().count(), 1, "expected the closed queue to be replaced, not added");

    Ok(())
}

#[tokio::test]
async fn queue_to_sink_pipeline_acknowledges_every_message() -> Result<()> {
    let broker = MemoryBroker::default();
    let remote = broker.queue("jobs");
    for n in 0..25 {
        remote.push(Message::new(format!("{{\"n\": {}}}", n)));
    }
    let mut streams = IronStream::new(Arc::new(broker));
    let queue = streams.queue(
        "jobs",
        QueueConfig {
            concurrency_limit: 3,
            fetch_count: 4,
            poll_interval: Duration::from_millis(2),
        },
    );
    let mut sink = streams.sink(&queue, SinkConfig { batch_size: 10 });

    let stats = tokio::time::timeout(TIMEOUT, sink.drain(queue.stream()?.take(25)))
        .await
        .context("timeout draining queue into sink")?;

    assert_eq!(stats, SinkStats { deleted: 25, failed: 0, rejected: 0 }, "unexpected sink stats");
    let dump = remote.dump();
    assert!(dump.ready.is_empty(), "expected the remote queue to be drained, got {} ready", dump.ready.len());
    assert!(dump.reserved.is_empty(), "expected every message to be acknowledged, got {} reserved", dump.reserved.len());

    Ok(())
}
