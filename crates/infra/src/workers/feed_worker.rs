use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use carbonledger_emissions::FactorReference;
use carbonledger_events::{ActivityEnvelope, EventBus};

use crate::feeds::{FactorWatcher, FeedTailer};
use crate::workers::WorkerHandle;

/// Polls the feed directory and publishes every new row on the bus.
///
/// When given a [`FactorWatcher`], the same loop also picks up changes to the
/// factor file and swaps them into the shared reference.
#[derive(Debug)]
pub struct FeedWorker;

impl FeedWorker {
    pub fn spawn<B>(
        name: &'static str,
        tailer: FeedTailer,
        factors: Option<(FactorWatcher, Arc<FactorReference>)>,
        bus: B,
        poll_interval: Duration,
    ) -> WorkerHandle
    where
        B: EventBus<ActivityEnvelope> + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || feed_loop(name, tailer, factors, bus, shutdown_rx, poll_interval))
            .expect("failed to spawn feed worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn feed_loop<B>(
    name: &'static str,
    mut tailer: FeedTailer,
    mut factors: Option<(FactorWatcher, Arc<FactorReference>)>,
    bus: B,
    shutdown_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
) where
    B: EventBus<ActivityEnvelope>,
{
    info!(worker = name, dir = %tailer.dir().display(), "feed worker started");

    loop {
        match tailer.poll() {
            Ok(rows) => {
                if !rows.is_empty() {
                    debug!(worker = name, rows = rows.len(), "feed rows read");
                }
                for row in rows {
                    if let Err(e) = bus.publish(row) {
                        warn!(worker = name, error = ?e, "failed to publish feed row");
                    }
                }
            }
            Err(e) => warn!(worker = name, error = %e, "feed poll failed"),
        }

        if let Some((watcher, reference)) = factors.as_mut() {
            watcher.poll(reference);
        }

        match shutdown_rx.recv_timeout(poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }

    info!(worker = name, "feed worker stopped");
}
