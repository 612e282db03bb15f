//! Infrastructure layer: feeds, resolver, pipeline, stores, workers, config
//! and the query facade.

pub mod config;
pub mod fallback;
pub mod feeds;
pub mod pipeline;
pub mod projections;
pub mod query;
pub mod read_model;
pub mod store_adapter;
pub mod workers;


pub use config::{ConfigError, WorkerConfig};
pub use fallback::{ChangeRecord, FallbackError, FallbackSink, JsonlFallbackLog};
pub use feeds::{FactorWatcher, FeedError, FeedTailer, load_factors};
pub use pipeline::{CommitReport, LedgerPipeline};
pub use query::{CarbonQueryService, QueryError};
pub use store_adapter::{LedgerStoreAdapter, RetryPolicy, WriteOutcome};
