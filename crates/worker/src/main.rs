//! Ledger worker: tails the activity feeds, keeps the carbon ledger current,
//! and exits cleanly on Ctrl-C after a final commit.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::Handle;

use carbonledger_analytics::LedgerReader;
use carbonledger_emissions::FactorReference;
use carbonledger_events::{ActivityEnvelope, InMemoryEventBus};
use carbonledger_infra::read_model::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use carbonledger_infra::workers::{FeedWorker, PipelineWorker, WorkerHandle};
use carbonledger_infra::{
    FactorWatcher, FeedTailer, JsonlFallbackLog, LedgerPipeline, LedgerStoreAdapter, WorkerConfig,
};

struct Running {
    feed: WorkerHandle,
    pipeline: WorkerHandle,
}

impl Running {
    /// Stop reading feeds first, then let the pipeline drain and commit.
    fn shutdown(self) {
        self.feed.shutdown();
        self.pipeline.shutdown();
    }
}

fn start<S>(cfg: &WorkerConfig, store: S, factors: Arc<FactorReference>, watcher: FactorWatcher) -> Running
where
    S: LedgerStore + 'static,
{
    // Bounded: a slow commit holds the feed tailer back.
    let bus: Arc<InMemoryEventBus<ActivityEnvelope>> =
        Arc::new(InMemoryEventBus::with_capacity(cfg.feed_queue_capacity));

    let adapter = LedgerStoreAdapter::new(store, JsonlFallbackLog::new(&cfg.outputs_dir), cfg.retry);
    let pipeline = LedgerPipeline::new(factors.clone(), adapter);

    // Subscribe before the feed worker can publish anything.
    let pipeline = PipelineWorker::spawn("ledger-pipeline", bus.clone(), pipeline, cfg.commit_interval);
    let feed = FeedWorker::spawn(
        "feed-tailer",
        FeedTailer::new(&cfg.streams_dir),
        Some((watcher, factors)),
        bus,
        cfg.feed_poll_interval,
    );

    Running { feed, pipeline }
}

async fn log_freshness<R>(reader: R)
where
    R: LedgerReader + 'static,
{
    match tokio::task::spawn_blocking(move || reader.last_computed_at()).await {
        Ok(Ok(Some(at))) => tracing::info!(last_computed_at = %at, "ledger freshness"),
        Ok(Ok(None)) => tracing::info!("ledger is empty"),
        Ok(Err(e)) => tracing::warn!(error = %e, "could not read ledger freshness"),
        Err(e) => tracing::warn!(error = %e, "freshness task failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    carbonledger_observability::init();

    let cfg = WorkerConfig::from_env().context("invalid worker configuration")?;

    // Factors must load before anything is compiled.
    let mut watcher = FactorWatcher::new(cfg.factors_path());
    let table = watcher
        .load()
        .with_context(|| format!("failed to load factors from {}", cfg.factors_path().display()))?;
    let factors = Arc::new(FactorReference::new(table));

    let running = match &cfg.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .context("failed to connect to Postgres")?;
            let store = Arc::new(PostgresLedgerStore::new(pool, Handle::current()));
            store.ensure_schema().await.context("failed to prepare schema")?;
            tracing::info!("using Postgres ledger store");

            log_freshness(store.clone()).await;
            start(&cfg, store, factors, watcher)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger store");
            start(&cfg, Arc::new(InMemoryLedgerStore::new()), factors, watcher)
        }
    };

    tracing::info!(
        streams_dir = %cfg.streams_dir.display(),
        commit_interval_ms = cfg.commit_interval.as_millis() as u64,
        "ledger worker started"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    tokio::task::spawn_blocking(move || running.shutdown())
        .await
        .context("shutdown task failed")?;

    tracing::info!(at = %chrono::Utc::now(), "ledger worker stopped");
    Ok(())
}
