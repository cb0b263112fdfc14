//! Queue controller.
//!
//! Each queue is driven by a single controller task which owns the queue's `PullBuffer` (and
//! through it the polling fetcher). Consumers & owners talk to the controller over a channel of
//! `QueueMsg`s, and fetch calls report back over a channel of `FetcherMsg`s, so the backlog,
//! the outstanding fetch counter and the wave accumulator are only ever mutated by the
//! controller task.
//!
//! The consumer side is a `QueueStream`, which requests exactly one message from the
//! controller each time it finds its delivery channel empty.

mod buffer;
mod fetcher;

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::client::QueueClient;
use crate::config::QueueConfig;
use crate::error::Error;
use crate::message::Message;

pub use buffer::{Downstream, Offer, PullBuffer, PullOutcome, WaveReceived};
pub use fetcher::{FetcherMsg, FetcherState, PollingFetcher, WaveOutcome};

/// The capacity of the channel carrying messages to the consumer stream.
///
/// The stream only pulls when this channel is empty, so one slot is all it ever needs.
const DOWNSTREAM_CAPACITY: usize = 1;
/// The capacity of the channel carrying control messages to the controller.
const CONTROL_CAPACITY: usize = 100;
/// The capacity of the channel carrying fetcher messages to the controller.
const FETCHER_CAPACITY: usize = 1000;
/// The capacity of the queue events channel.
const EVENTS_CAPACITY: usize = 100;

/// An event observable by a queue's owner.
#[derive(Clone, Debug)]
pub enum QueueEvent {
    /// A fetch call failed and polling has halted; call `Queue::resume` to re-arm it.
    QueueError(Arc<Error>),
    /// A fetch wave completed and was added to the backlog.
    WaveReceived { len: usize },
}

/// A snapshot of a queue controller's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueStatus {
    pub backlog: usize,
    pub fetcher: FetcherState,
    pub outstanding: u32,
    pub paused: bool,
    pub pull_pending: bool,
}

/// A message bound for a queue controller.
pub enum QueueMsg {
    /// The consumer is ready for its next message.
    Pull,
    /// Halt polling.
    Pause,
    /// Re-arm polling.
    Resume,
    /// Drop all buffered messages.
    ResetBacklog(oneshot::Sender<usize>),
    /// Shut the fetcher down for good; buffered messages remain deliverable.
    StopFetching,
    /// Report the controller's state.
    Status(oneshot::Sender<QueueStatus>),
    /// Shut the controller down.
    Shutdown,
}

/// A handle to a queue controller.
#[derive(Clone)]
pub struct Queue {
    name: Arc<String>,
    client: Arc<dyn QueueClient>,
    tx: mpsc::Sender<QueueMsg>,
    events: broadcast::Sender<QueueEvent>,
    stream: Arc<Mutex<Option<QueueStream>>>,
}

impl Queue {
    /// Spawn a new queue controller polling the given client.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(name: &str, client: Arc<dyn QueueClient>, config: QueueConfig) -> Self {
        let name = Arc::new(name.to_string());
        let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
        let (downstream, downstream_rx) = mpsc::channel(DOWNSTREAM_CAPACITY);
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let (fetcher_tx, fetcher_rx) = mpsc::channel(FETCHER_CAPACITY);

        let fetcher = PollingFetcher::new(client.clone(), &config, fetcher_tx);
        let ctl = QueueCtl {
            name: name.clone(),
            buffer: PullBuffer::new(fetcher),
            downstream,
            msgs_rx: ReceiverStream::new(rx),
            fetcher_rx: ReceiverStream::new(fetcher_rx),
            events: events.clone(),
            descheduled: false,
        };
        ctl.spawn();

        let stream = QueueStream {
            rx: downstream_rx,
            tx: tx.clone(),
            pull_requested: false,
            reserve: None,
        };
        Self {
            name,
            client,
            tx,
            events,
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// The name of this queue.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The client this queue polls.
    pub fn client(&self) -> Arc<dyn QueueClient> {
        self.client.clone()
    }

    /// Take the consumer stream of this queue. A queue has exactly one stream.
    pub fn stream(&self) -> Result<QueueStream, Error> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::StreamTaken(self.name.to_string()))
    }

    /// Subscribe to this queue's events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Check if this queue's controller has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait for this queue's controller to shut down.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Issue a pull on behalf of the consumer.
    pub async fn pull(&self) -> Result<(), Error> {
        self.send(QueueMsg::Pull).await
    }

    /// Halt polling. Buffered messages are still delivered.
    pub async fn pause(&self) -> Result<(), Error> {
        self.send(QueueMsg::Pause).await
    }

    /// Re-arm polling after a pause or a fetch error.
    pub async fn resume(&self) -> Result<(), Error> {
        self.send(QueueMsg::Resume).await
    }

    /// Drop all buffered messages, returning how many were dropped.
    pub async fn reset_backlog(&self) -> Result<usize, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(QueueMsg::ResetBacklog(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Stop polling the remote queue for good.
    pub async fn stop_fetching(&self) -> Result<(), Error> {
        self.send(QueueMsg::StopFetching).await
    }

    /// Fetch a snapshot of the controller's state.
    pub async fn status(&self) -> Result<QueueStatus, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(QueueMsg::Status(tx)).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Shut the controller down. The consumer stream ends once drained.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.send(QueueMsg::Shutdown).await
    }

    async fn send(&self, msg: QueueMsg) -> Result<(), Error> {
        self.tx.send(msg).await.map_err(|_| Error::Closed)
    }
}

/// The consumer side of a queue.
pub struct QueueStream {
    rx: mpsc::Receiver<Message>,
    tx: mpsc::Sender<QueueMsg>,
    /// A pull has been sent and not yet answered with a message.
    pull_requested: bool,
    /// A pending reservation of a control channel slot for the next pull.
    reserve: Option<BoxFuture<'static, Result<OwnedPermit<QueueMsg>, SendError<()>>>>,
}

impl Stream for QueueStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) => {
                self.pull_requested = false;
                Poll::Ready(Some(msg))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                if self.pull_requested {
                    return Poll::Pending;
                }
                let QueueStream { tx, reserve, pull_requested, .. } = &mut *self;
                let reserved = reserve.get_or_insert_with(|| tx.clone().reserve_owned().boxed()).poll_unpin(cx);
                match reserved {
                    Poll::Ready(Ok(permit)) => {
                        *reserve = None;
                        let _ = permit.send(QueueMsg::Pull);
                        *pull_requested = true;
                        Poll::Pending
                    }
                    Poll::Ready(Err(_)) => {
                        *reserve = None;
                        Poll::Ready(None)
                    }
                    // The control channel is full; the reservation wakes this task once a slot frees up.
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

/// A queue controller, owning all state of one queue.
struct QueueCtl {
    name: Arc<String>,
    buffer: PullBuffer,
    /// The delivery channel of the consumer stream.
    downstream: mpsc::Sender<Message>,

    /// A channel of control messages from handles & the consumer stream.
    msgs_rx: ReceiverStream<QueueMsg>,
    /// A channel of ticks & fetch results from the fetcher's tasks.
    fetcher_rx: ReceiverStream<FetcherMsg>,
    /// A channel of events for the queue's owner.
    events: broadcast::Sender<QueueEvent>,
    /// A bool indicating that this controller needs to shutdown.
    descheduled: bool,
}

impl QueueCtl {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!(queue = %self.name, "queue controller has started");

        loop {
            if self.descheduled {
                break;
            }
            tokio::select! {
                msg = self.msgs_rx.next() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    None => break,
                },
                Some(msg) = self.fetcher_rx.next() => self.handle_fetcher_msg(msg),
            }
        }

        self.buffer.shutdown();
        tracing::debug!(queue = %self.name, "queue controller has shutdown");
    }

    /// Handle a message sent to this controller from a handle or the consumer stream.
    #[tracing::instrument(level = "trace", skip(self, msg), fields(queue = %self.name))]
    fn handle_msg(&mut self, msg: QueueMsg) {
        match msg {
            QueueMsg::Pull => {
                let outcome = self.buffer.on_pull(&mut self.downstream);
                tracing::trace!(?outcome, "pull handled");
            }
            QueueMsg::Pause => self.buffer.pause(),
            QueueMsg::Resume => self.buffer.resume(),
            QueueMsg::ResetBacklog(tx) => {
                let _ = tx.send(self.buffer.reset_backlog());
            }
            QueueMsg::StopFetching => self.buffer.shutdown(),
            QueueMsg::Status(tx) => {
                let _ = tx.send(QueueStatus {
                    backlog: self.buffer.backlog_len(),
                    fetcher: self.buffer.fetcher_state(),
                    outstanding: self.buffer.fetcher().outstanding(),
                    paused: self.buffer.is_paused(),
                    pull_pending: self.buffer.pull_pending(),
                });
            }
            QueueMsg::Shutdown => {
                self.descheduled = true;
            }
        }
    }

    /// Handle a tick or fetch result from the fetcher's tasks.
    #[tracing::instrument(level = "trace", skip(self, msg), fields(queue = %self.name))]
    fn handle_fetcher_msg(&mut self, msg: FetcherMsg) {
        match self.buffer.on_fetcher_msg(msg, &mut self.downstream) {
            Ok(Some(wave)) => {
                tracing::debug!(len = wave.len, delivery = ?wave.delivery, backlog = self.buffer.backlog_len(), "wave received");
                let _ = self.events.send(QueueEvent::WaveReceived { len: wave.len });
            }
            Ok(None) => (),
            Err(err) => {
                tracing::error!(error = ?err, "fetch error, polling has halted");
                let _ = self.events.send(QueueEvent::QueueError(Arc::new(err)));
            }
        }
    }
}
