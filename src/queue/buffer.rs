//! The pull buffer, adapting fetch waves to per-item pull delivery.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::Error;
use crate::message::{Delivery, Message};
use crate::queue::fetcher::{FetcherMsg, FetcherState, PollingFetcher, WaveOutcome};

/// The result of offering a message to a downstream consumer.
#[derive(Debug)]
pub enum Offer {
    /// The downstream took ownership of the message.
    Accepted,
    /// The downstream is saturated; the message is handed back.
    Declined(Message),
    /// The downstream has gone away; the message is handed back.
    Closed(Message),
}

/// A consumer which may decline synchronous delivery.
pub trait Downstream {
    /// Offer a single message to this consumer.
    fn offer(&mut self, msg: Message) -> Offer;
}

impl Downstream for mpsc::Sender<Message> {
    fn offer(&mut self, msg: Message) -> Offer {
        match self.try_send(msg) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(msg)) => Offer::Declined(msg),
            Err(TrySendError::Closed(msg)) => Offer::Closed(msg),
        }
    }
}

/// The outcome of a pull against the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// One message was delivered downstream.
    Delivered,
    /// The downstream declined delivery; the message remains at the head of the backlog.
    Saturated,
    /// The downstream has gone away; the message remains at the head of the backlog.
    Closed,
    /// The backlog is empty; the pull stays pending until a wave arrives.
    Fetching,
    /// The backlog is empty and polling is paused; the pull stays pending.
    Paused,
}

/// A completed wave which has been added to the backlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveReceived {
    /// The number of messages in the wave.
    pub len: usize,
    /// The outcome of delivering to a pending pull, if one was waiting.
    pub delivery: Option<PullOutcome>,
}

/// A FIFO backlog of fetched messages, fed by a polling fetcher & drained one message per pull.
pub struct PullBuffer {
    backlog: VecDeque<Message>,
    fetcher: PollingFetcher,
    /// A pull arrived while the backlog was empty and has not been satisfied yet.
    pull_pending: bool,
    /// Polling has been explicitly paused by the owner.
    paused: bool,
}

impl PullBuffer {
    /// Create a new instance.
    pub fn new(fetcher: PollingFetcher) -> Self {
        Self {
            backlog: VecDeque::new(),
            fetcher,
            pull_pending: false,
            paused: false,
        }
    }

    /// The number of buffered messages.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Check if a pull is waiting on the next wave.
    pub fn pull_pending(&self) -> bool {
        self.pull_pending
    }

    /// Check if polling has been paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &PollingFetcher {
        &self.fetcher
    }

    /// Handle a pull from the downstream consumer, delivering at most one message.
    pub fn on_pull<D: Downstream + ?Sized>(&mut self, downstream: &mut D) -> PullOutcome {
        if let Some(msg) = self.backlog.pop_front() {
            self.pull_pending = false;
            return self.deliver(msg, downstream);
        }
        self.pull_pending = true;
        if self.paused {
            return PullOutcome::Paused;
        }
        if !self.fetcher.is_running() {
            self.fetcher.start();
        }
        PullOutcome::Fetching
    }

    /// Append a completed wave to the backlog, satisfying a pending pull if there is one.
    ///
    /// Once the backlog holds messages the fetcher is stopped; the next pull against an empty
    /// backlog starts it again.
    pub fn on_wave_received<M, D>(&mut self, messages: M, downstream: &mut D) -> Option<PullOutcome>
    where
        M: Into<Delivery<Message>>,
        D: Downstream + ?Sized,
    {
        let messages = messages.into().into_vec();
        if messages.is_empty() {
            return None;
        }
        tracing::debug!(len = messages.len(), backlog = self.backlog.len(), "adding wave to backlog");
        self.backlog.extend(messages);

        let outcome = if self.pull_pending {
            self.pull_pending = false;
            self.backlog.pop_front().map(|msg| self.deliver(msg, downstream))
        } else {
            None
        };
        if !self.backlog.is_empty() {
            self.fetcher.stop();
        }
        outcome
    }

    /// Route a message from the fetcher's tasks through the fetcher.
    ///
    /// Returns the fetch error of a failed wave, which has already stopped the fetcher.
    pub fn on_fetcher_msg<D: Downstream + ?Sized>(&mut self, msg: FetcherMsg, downstream: &mut D) -> Result<Option<WaveReceived>, Error> {
        match msg {
            FetcherMsg::Tick(epoch) => {
                self.fetcher.handle_tick(epoch);
                Ok(None)
            }
            FetcherMsg::Fetched { wave, res } => match self.fetcher.handle_fetched(wave, res) {
                Some(WaveOutcome::Complete(messages)) => {
                    let len = messages.len();
                    let delivery = self.on_wave_received(messages, downstream);
                    Ok(Some(WaveReceived { len, delivery }))
                }
                Some(WaveOutcome::Failed(err)) => Err(err),
                None => Ok(None),
            },
        }
    }

    /// Halt polling outright. Buffered messages are still delivered on pull.
    pub fn pause(&mut self) {
        if !self.paused {
            tracing::debug!("pausing polling");
        }
        self.paused = true;
        self.fetcher.stop();
    }

    /// Re-arm polling after a pause or a fetch error.
    pub fn resume(&mut self) {
        if self.paused {
            tracing::debug!("resuming polling");
        }
        self.paused = false;
        if self.backlog.is_empty() {
            self.fetcher.start();
        }
    }

    /// Drop all buffered messages, returning how many were dropped.
    ///
    /// In-flight fetch calls are unaffected.
    pub fn reset_backlog(&mut self) -> usize {
        let dropped = self.backlog.len();
        self.backlog.clear();
        tracing::debug!(dropped, "backlog reset");
        dropped
    }

    /// Stop polling for good.
    pub fn shutdown(&mut self) {
        self.fetcher.shutdown();
    }

    /// The state of the underlying fetcher.
    pub fn fetcher_state(&self) -> FetcherState {
        self.fetcher.state()
    }

    fn deliver<D: Downstream + ?Sized>(&mut self, msg: Message, downstream: &mut D) -> PullOutcome {
        match downstream.offer(msg) {
            Offer::Accepted => {
                tracing::trace!(backlog = self.backlog.len(), "pushed one message downstream");
                PullOutcome::Delivered
            }
            Offer::Declined(msg) => {
                tracing::debug!("downstream backpressure detected");
                self.backlog.push_front(msg);
                PullOutcome::Saturated
            }
            Offer::Closed(msg) => {
                tracing::debug!("downstream has closed");
                self.backlog.push_front(msg);
                PullOutcome::Closed
            }
        }
    }
}
