use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use bookwell_events::{EventBus, EventEnvelope, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic bus worker loop.
///
/// - Subscribes to an event bus (before returning, so nothing published
///   after `spawn` is missed)
/// - Skips envelopes of other aggregate types when a filter is given
/// - Applies a handler per envelope; handlers must tolerate redelivery
/// - Wakes every 250ms to check for shutdown
#[derive(Debug)]
pub struct BusWorker;

impl BusWorker {
    pub fn spawn<B, H, E>(
        name: &'static str,
        bus: B,
        aggregate_type: Option<&'static str>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
        H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, aggregate_type, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<JsonValue>>,
    shutdown_rx: mpsc::Receiver<()>,
    aggregate_type: Option<&'static str>,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                if aggregate_type.is_some_and(|t| envelope.aggregate_type() != t) {
                    continue;
                }
                if let Err(err) = handler(envelope) {
                    warn!(worker = name, error = %err, "bus worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
