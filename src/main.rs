//! A demo pipeline: an in-memory queue consumed as a stream, decoded, and acknowledged in batches.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use serde_json::json;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::SignalStream;
use tokio_stream::StreamMap;
use tracing_subscriber::prelude::*;

use ironstream::{AckSink, Config, IronStream, JsonDecoder, MemoryBroker, Message, QueueEvent, SinkEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::new()?;

    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the configured directives.
        .with(tracing_subscriber::EnvFilter::try_new(&cfg.log_filter).context("error parsing log filter")?)
        // Send a copy of all spans to stdout in compact form.
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true).with_ansi(true))
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    tracing::info!(
        queue = %cfg.demo_queue,
        messages = cfg.demo_messages,
        concurrency_limit = cfg.concurrency_limit,
        fetch_count = cfg.fetch_count,
        poll_interval_ms = cfg.poll_interval_ms,
        batch_size = cfg.batch_size,
        "starting ironstream demo",
    );
    if let Err(err) = run(cfg).await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    let broker = MemoryBroker::default();
    let remote = broker.queue(&cfg.demo_queue);
    for n in 0..cfg.demo_messages {
        let body = json!({"job": "resize", "seq": n}).to_string();
        remote.push(Message::new(body));
    }

    let mut streams = IronStream::new(Arc::new(broker));
    let queue = streams.queue(&cfg.demo_queue, cfg.queue_config());
    let mut sink = streams.sink(&queue, cfg.sink_config());
    spawn_event_loggers(queue.events(), sink.events());

    let decoder = JsonDecoder::default();
    let mut stream = queue.stream()?.take(cfg.demo_messages);
    let mut signals = StreamMap::new();
    signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
    signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

    loop {
        tokio::select! {
            Some((_, sig)) = signals.next() => {
                tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                break;
            }
            msg_opt = stream.next() => match msg_opt {
                Some(msg) => {
                    match decoder.decode(&msg) {
                        Ok(val) => tracing::debug!(value = %val, "decoded message"),
                        Err(err) => tracing::warn!(error = ?err, "error decoding message"),
                    }
                    sink.acknowledge(msg).await;
                }
                None => break,
            },
        }
    }

    // Begin shutdown routine.
    sink.flush().await;
    if let Err(err) = queue.shutdown().await {
        tracing::error!(error = ?err, "error shutting down queue");
    }
    let dump = remote.dump();
    tracing::info!(
        stats = ?sink.stats(),
        remaining = dump.ready.len(),
        unacknowledged = dump.reserved.len(),
        "ironstream demo complete",
    );
    Ok(())
}

/// Log queue & sink events until their channels close.
fn spawn_event_loggers(mut queue_events: tokio::sync::broadcast::Receiver<QueueEvent>, mut sink_events: tokio::sync::broadcast::Receiver<SinkEvent>) {
    tokio::spawn(async move {
        loop {
            match queue_events.recv().await {
                Ok(QueueEvent::QueueError(err)) => tracing::error!(error = ?err, "queue error"),
                Ok(QueueEvent::WaveReceived { len }) => tracing::debug!(len, "wave received"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "queue event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    tokio::spawn(async move {
        loop {
            match sink_events.recv().await {
                Ok(SinkEvent::Deleted(ids)) => tracing::debug!(count = ids.len(), "batch deleted"),
                Ok(SinkEvent::DeleteError(err, _)) => tracing::error!(error = ?err, "error deleting batch"),
                Ok(SinkEvent::ValidationError(err)) => tracing::warn!(error = ?err, "message rejected"),
                Ok(SinkEvent::DeletePending(_)) => (),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "sink event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
