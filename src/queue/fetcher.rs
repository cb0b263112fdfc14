//! Concurrency-bounded polling fetcher.
//!
//! The fetcher does not own a task of its own. Its owner receives `FetcherMsg`s from the channel
//! given at construction and feeds them back through `handle_tick` & `handle_fetched`, so all
//! fetcher state is mutated from the owner's control loop. Only the ticker and the individual
//! fetch calls run as spawned tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::client::QueueClient;
use crate::config::QueueConfig;
use crate::error::Error;
use crate::message::Message;

/// The shortest accepted polling cadence.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The lifecycle states of a fetcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetcherState {
    /// No ticker is armed.
    Idle,
    /// The ticker is armed and waves are being issued.
    Running,
    /// Terminal. No ticker will ever be armed again.
    ShuttingDown,
}

/// A message produced by the fetcher's spawned tasks, bound for the fetcher's owner.
#[derive(Debug)]
pub enum FetcherMsg {
    /// A tick of the ticker armed for the given epoch.
    Tick(u64),
    /// The result of a fetch call dispatched as part of the given wave.
    Fetched { wave: u64, res: anyhow::Result<Vec<Message>> },
}

/// The outcome of a wave.
#[derive(Debug)]
pub enum WaveOutcome {
    /// Every call of the wave resolved and at least one message was returned.
    Complete(Vec<Message>),
    /// A call of the wave failed; the fetcher has stopped and the wave was discarded.
    Failed(Error),
}

/// A fetcher which polls a remote queue with a bounded number of concurrent fetch calls.
pub struct PollingFetcher {
    client: Arc<dyn QueueClient>,
    concurrency_limit: u32,
    fetch_count: u32,
    poll_interval: Duration,
    tx: mpsc::Sender<FetcherMsg>,

    state: FetcherState,
    /// Cancels the active ticker when fired or dropped.
    ticker: Option<oneshot::Sender<()>>,
    /// The epoch of the active ticker; ticks of older tickers are ignored.
    tick_epoch: u64,

    /// The number of fetch calls currently in flight.
    outstanding: u32,
    /// The current wave; results of older waves are dropped.
    wave: u64,
    /// Results accumulated for the current wave.
    results: Vec<Message>,
}

impl PollingFetcher {
    /// Create a new instance in the `Idle` state.
    pub fn new(client: Arc<dyn QueueClient>, config: &QueueConfig, tx: mpsc::Sender<FetcherMsg>) -> Self {
        Self {
            client,
            concurrency_limit: config.concurrency_limit.max(1),
            fetch_count: config.fetch_count.max(1),
            poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            tx,
            state: FetcherState::Idle,
            ticker: None,
            tick_epoch: 0,
            outstanding: 0,
            wave: 0,
            results: Vec::new(),
        }
    }

    /// The current state of this fetcher.
    pub fn state(&self) -> FetcherState {
        self.state
    }

    /// Check if this fetcher is running.
    pub fn is_running(&self) -> bool {
        self.state == FetcherState::Running
    }

    /// The number of fetch calls currently in flight.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Arm the ticker & begin issuing waves.
    ///
    /// This is a no-op when already running, and when shutting down.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn start(&mut self) {
        match self.state {
            FetcherState::Running => return,
            FetcherState::ShuttingDown => {
                tracing::debug!("fetcher has shut down and will not be restarted");
                return;
            }
            FetcherState::Idle => (),
        }
        tracing::debug!(outstanding = self.outstanding, "starting fetcher");
        self.state = FetcherState::Running;
        self.tick_epoch += 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.ticker = Some(cancel_tx);
        spawn_ticker(self.poll_interval, self.tick_epoch, self.tx.clone(), cancel_rx);
    }

    /// Cancel the ticker. In-flight calls still resolve and are still accounted for.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn stop(&mut self) {
        if self.state == FetcherState::Running {
            tracing::debug!("stopping fetcher");
            self.state = FetcherState::Idle;
        }
        self.cancel_ticker();
    }

    /// Stop this fetcher for good.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn shutdown(&mut self) {
        if self.state != FetcherState::ShuttingDown {
            tracing::debug!("shutting down fetcher");
        }
        self.state = FetcherState::ShuttingDown;
        self.cancel_ticker();
    }

    /// Handle a tick, topping up in-flight fetch calls to the concurrency limit.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn handle_tick(&mut self, epoch: u64) {
        if self.state != FetcherState::Running || epoch != self.tick_epoch {
            return;
        }
        // A wave which already holds results is left to drain before new calls go out.
        if !self.results.is_empty() {
            return;
        }
        while self.outstanding < self.concurrency_limit {
            self.outstanding += 1;
            tracing::trace!(outstanding = self.outstanding, wave = self.wave, "dispatching fetch");
            spawn_fetch(self.client.clone(), self.fetch_count, self.wave, self.tx.clone());
        }
    }

    /// Handle the result of a fetch call, returning the wave's outcome once it is known.
    #[tracing::instrument(level = "trace", skip(self, res))]
    pub fn handle_fetched(&mut self, wave: u64, res: anyhow::Result<Vec<Message>>) -> Option<WaveOutcome> {
        self.outstanding = self.outstanding.saturating_sub(1);
        if wave != self.wave {
            tracing::debug!(wave, outstanding = self.outstanding, "dropping fetch result of a discarded wave");
            return None;
        }
        match res {
            Err(err) => {
                tracing::error!(error = ?err, outstanding = self.outstanding, "error in fetch, stopping fetcher");
                self.stop();
                self.results.clear();
                self.wave += 1;
                Some(WaveOutcome::Failed(Error::Fetch(err)))
            }
            Ok(messages) => {
                tracing::trace!(len = messages.len(), outstanding = self.outstanding, "successful fetch");
                self.results.extend(messages);
                if self.outstanding == 0 && !self.results.is_empty() {
                    let results = std::mem::take(&mut self.results);
                    tracing::debug!(len = results.len(), "fetch wave complete");
                    return Some(WaveOutcome::Complete(results));
                }
                None
            }
        }
    }

    fn cancel_ticker(&mut self) {
        if let Some(cancel) = self.ticker.take() {
            let _ = cancel.send(());
        }
    }
}

/// Spawn a ticker which emits ticks for the given epoch until cancelled.
fn spawn_ticker(period: Duration, epoch: u64, tx: mpsc::Sender<FetcherMsg>, mut cancel: oneshot::Receiver<()>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if tx.send(FetcherMsg::Tick(epoch)).await.is_err() {
                        break;
                    }
                }
                _ = &mut cancel => break,
            }
        }
    });
}

/// Spawn a fetch call against the remote queue, sending its result back to the fetcher's owner.
fn spawn_fetch(client: Arc<dyn QueueClient>, count: u32, wave: u64, tx: mpsc::Sender<FetcherMsg>) {
    tokio::spawn(async move {
        let res = client.fetch(count).await;
        let _ = tx.send(FetcherMsg::Fetched { wave, res }).await;
    });
}
