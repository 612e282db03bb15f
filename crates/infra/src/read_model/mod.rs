//! Ledger and entity storage.

pub mod ledger_store;
pub mod postgres;

pub use ledger_store::{
    AsyncLedgerStore, CommitBatch, InMemoryLedgerStore, LedgerStore, ReportStore, StoreError,
};
pub use postgres::PostgresLedgerStore;
