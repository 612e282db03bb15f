use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use carbonledger_events::{ActivityEnvelope, EventBus, Subscription};

use crate::fallback::FallbackSink;
use crate::pipeline::LedgerPipeline;
use crate::read_model::LedgerStore;
use crate::store_adapter::WriteOutcome;
use crate::workers::WorkerHandle;

/// Drives a [`LedgerPipeline`] from a bus subscription.
///
/// - Every received envelope is folded into the resolver immediately
/// - Changes are committed on a fixed cadence (`commit_interval`)
/// - Shutdown drains what is already queued and runs one last commit
#[derive(Debug)]
pub struct PipelineWorker;

impl PipelineWorker {
    pub fn spawn<B, S, F>(
        name: &'static str,
        bus: B,
        pipeline: LedgerPipeline<S, F>,
        commit_interval: Duration,
    ) -> WorkerHandle
    where
        B: EventBus<ActivityEnvelope> + Send + Sync + 'static,
        S: LedgerStore + 'static,
        F: FallbackSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<ActivityEnvelope> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || pipeline_loop(name, sub, shutdown_rx, pipeline, commit_interval))
            .expect("failed to spawn pipeline worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn pipeline_loop<S, F>(
    name: &'static str,
    sub: Subscription<ActivityEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    mut pipeline: LedgerPipeline<S, F>,
    commit_interval: Duration,
) where
    S: LedgerStore,
    F: FallbackSink,
{
    info!(worker = name, interval_ms = commit_interval.as_millis() as u64, "pipeline worker started");

    let mut next_commit = Instant::now() + commit_interval;

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let wait = next_commit
            .saturating_duration_since(Instant::now())
            .min(Duration::from_millis(250));

        match sub.recv_timeout(wait) {
            Ok(envelope) => {
                pipeline.ingest(&envelope);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_commit {
            commit(name, &mut pipeline);
            // Keep a stable cadence even if we were delayed.
            while next_commit <= now {
                next_commit += commit_interval;
            }
        }
    }

    while let Ok(envelope) = sub.try_recv() {
        pipeline.ingest(&envelope);
    }
    commit(name, &mut pipeline);

    info!(worker = name, "pipeline worker stopped");
}

fn commit<S, F>(name: &'static str, pipeline: &mut LedgerPipeline<S, F>)
where
    S: LedgerStore,
    F: FallbackSink,
{
    let Some(report) = pipeline.commit(Utc::now()) else {
        return;
    };
    match &report.outcome {
        WriteOutcome::Persisted { attempts } => info!(
            worker = name,
            entities = report.entities,
            lines = report.lines,
            factor_reload = report.factor_reload,
            attempts,
            "ledger commit persisted"
        ),
        other => warn!(
            worker = name,
            entities = report.entities,
            lines = report.lines,
            warning = other.warning().unwrap_or_default(),
            "ledger commit missed the primary store"
        ),
    }
}
