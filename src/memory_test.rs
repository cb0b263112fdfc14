use anyhow::Result;

use crate::client::{Connector, QueueClient};
use crate::memory::{MemoryBroker, MemoryQueue, FIELD_RESERVED_COUNT};
use crate::message::Message;

#[tokio::test]
async fn fetch_reserves_messages_and_assigns_ids() -> Result<()> {
    let queue = MemoryQueue::with_messages(vec![Message::new("hello"), Message::new("world"), Message::with_id("known", "!")]);

    let fetched = queue.fetch(2).await?;

    assert_eq!(fetched.len(), 2, "expected 2 messages fetched, got {}", fetched.len());
    assert!(fetched.iter().all(|msg| msg.id().is_some()), "expected all fetched messages to carry an id");
    assert_eq!(fetched[0].body, "hello", "expected queue order to be preserved");
    assert_eq!(fetched[0].fields.get(FIELD_RESERVED_COUNT).and_then(|val| val.as_u64()), Some(1));
    let dump = queue.dump();
    assert_eq!(dump.ready.len(), 1, "expected 1 ready message, got {}", dump.ready.len());
    assert_eq!(dump.reserved.len(), 2, "expected 2 reserved messages, got {}", dump.reserved.len());

    let rest = queue.fetch(10).await?;
    assert_eq!(rest[0].id(), Some("known"), "expected seeded id to be kept");
    assert!(queue.fetch(10).await?.is_empty(), "expected an empty fetch from a drained queue");
    assert_eq!(queue.fetch_calls(), 3, "unexpected fetch call count");

    Ok(())
}

#[tokio::test]
async fn ack_batch_rejects_unknown_ids_without_partial_deletes() -> Result<()> {
    let queue = MemoryQueue::with_messages(vec![Message::new("a"), Message::new("b")]);
    let ids: Vec<String> = queue.fetch(2).await?.into_iter().filter_map(|msg| msg.id).collect();

    let res = queue.ack_batch(&[ids[0].clone(), "missing".into()]).await;
    assert!(res.is_err(), "expected ack of an unknown id to fail");
    assert_eq!(queue.dump().reserved.len(), 2, "expected no reservations to be released by a failed batch");

    queue.ack_batch(&ids).await?;
    assert!(queue.dump().reserved.is_empty(), "expected all reservations to be deleted");
    assert!(queue.ack(&ids[0]).await.is_err(), "expected a second ack of the same id to fail");

    Ok(())
}

#[tokio::test]
async fn release_reserved_requeues_messages_for_redelivery() -> Result<()> {
    let queue = MemoryQueue::with_messages(vec![Message::new("a"), Message::new("b")]);
    let first = queue.fetch(1).await?;

    let released = queue.release_reserved();
    assert_eq!(released, 1, "expected 1 released message, got {}", released);

    let again = queue.fetch(1).await?;
    assert_eq!(again[0].id, first[0].id, "expected the released message to be redelivered first");
    assert_eq!(again[0].fields.get(FIELD_RESERVED_COUNT).and_then(|val| val.as_u64()), Some(2));

    Ok(())
}

#[tokio::test]
async fn release_reserved_keeps_fetch_order() -> Result<()> {
    let queue = MemoryQueue::with_messages(["a", "b", "c", "d", "e"].iter().map(|body| Message::new(*body)));
    queue.fetch(2).await?;
    queue.fetch(3).await?;

    let reserved: Vec<String> = queue.dump().reserved.into_iter().map(|msg| msg.body).collect();
    assert_eq!(reserved, vec!["a", "b", "c", "d", "e"], "expected reservations to be listed in fetch order");

    assert_eq!(queue.release_reserved(), 5, "expected all reservations to be released");
    let again: Vec<String> = queue.fetch(5).await?.into_iter().map(|msg| msg.body).collect();
    assert_eq!(again, vec!["a", "b", "c", "d", "e"], "expected released messages to be redelivered in fetch order");

    Ok(())
}

#[tokio::test]
async fn broker_hands_out_shared_queues_by_name() -> Result<()> {
    let broker = MemoryBroker::default();
    broker.queue("jobs").push(Message::new("a"));

    let client = broker.connect("jobs");
    let fetched = client.fetch(10).await?;
    assert_eq!(fetched.len(), 1, "expected the connected client to see the seeded message");
    assert!(broker.connect("other").fetch(10).await?.is_empty(), "expected distinct queues per name");

    Ok(())
}
