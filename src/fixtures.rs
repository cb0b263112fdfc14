use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::client::QueueClient;
use crate::message::Message;

/// A queue client returning scripted fetch responses & recording all calls.
///
/// Fetch calls pop the next scripted response, falling back to an empty response once the script
/// is exhausted. Every fetch call sleeps for the configured delay before responding.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<Vec<Message>>>>,
    delay: Duration,
    fail_acks: bool,

    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    fetch_calls: AtomicU32,
    acks: Mutex<Vec<Vec<String>>>,
}

impl ScriptedClient {
    /// Create a new instance with the given fetch delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay, ..Default::default() }
    }

    /// Create a new instance whose acknowledgment calls always fail.
    pub fn failing_acks() -> Self {
        Self {
            fail_acks: true,
            ..Default::default()
        }
    }

    /// Script a successful fetch response with messages of the given bodies.
    pub fn respond_with(self, bodies: &[&str]) -> Self {
        let msgs = bodies.iter().map(|body| Message::with_id(format!("{}.id", body), *body)).collect();
        self.push_response(Ok(msgs));
        self
    }

    /// Script a failed fetch response.
    pub fn fail_with(self, reason: &'static str) -> Self {
        self.push_response(Err(anyhow::anyhow!(reason)));
        self
    }

    /// Script `count` failed fetch responses.
    pub fn fail_all(self, count: usize) -> Self {
        for _ in 0..count {
            self.push_response(Err(anyhow::anyhow!("remote queue unavailable")));
        }
        self
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn acks(&self) -> Vec<Vec<String>> {
        self.acks.lock().map(|acks| acks.clone()).unwrap_or_default()
    }

    fn push_response(&self, res: Result<Vec<Message>>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(res);
        }
    }
}

#[async_trait]
impl QueueClient for ScriptedClient {
    async fn fetch(&self, _count: u32) -> Result<Vec<Message>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let res = self.responses.lock().ok().and_then(|mut responses| responses.pop_front());
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res.unwrap_or_else(|| Ok(vec![]))
    }

    async fn ack(&self, id: &str) -> Result<()> {
        self.ack_batch(&[id.to_string()]).await
    }

    async fn ack_batch(&self, ids: &[String]) -> Result<()> {
        if let Ok(mut acks) = self.acks.lock() {
            acks.push(ids.to_vec());
        }
        if self.fail_acks {
            bail!("remote queue rejected delete");
        }
        Ok(())
    }
}

/// Wrap a scripted client for use as a queue client.
pub fn shared(client: ScriptedClient) -> (Arc<ScriptedClient>, Arc<dyn QueueClient>) {
    let client = Arc::new(client);
    let dynamic: Arc<dyn QueueClient> = client.clone();
    (client, dynamic)
}
