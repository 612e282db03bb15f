//! Ledger store adapter.
//!
//! Wraps the primary store with bounded retries and a local fallback log. A
//! commit always ends in a [`WriteOutcome`]; failures are reported, never
//! propagated, so the pipeline keeps running while the database is down.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::fallback::FallbackSink;
use crate::read_model::{CommitBatch, LedgerStore};

/// Retry schedule for primary store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

/// How a commit ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the primary store.
    Persisted { attempts: u32 },
    /// Primary store failed; the batch was exported to the fallback log.
    FallbackExported {
        attempts: u32,
        records: usize,
        warning: String,
    },
    /// Both destinations failed. The caller still holds the batch.
    Unpersisted { warning: String },
}

impl WriteOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, WriteOutcome::Persisted { .. })
    }

    /// Operator-facing warning, if the batch did not reach the primary store.
    pub fn warning(&self) -> Option<&str> {
        match self {
            WriteOutcome::Persisted { .. } => None,
            WriteOutcome::FallbackExported { warning, .. } | WriteOutcome::Unpersisted { warning } => {
                Some(warning)
            }
        }
    }
}

pub struct LedgerStoreAdapter<S, F> {
    primary: S,
    fallback: F,
    retry: RetryPolicy,
}

impl<S, F> LedgerStoreAdapter<S, F>
where
    S: LedgerStore,
    F: FallbackSink,
{
    pub fn new(primary: S, fallback: F, retry: RetryPolicy) -> Self {
        Self {
            primary,
            fallback,
            retry,
        }
    }

    pub fn primary(&self) -> &S {
        &self.primary
    }

    /// Write one batch: primary with retries, then the fallback log.
    pub fn write(&self, batch: &CommitBatch) -> WriteOutcome {
        self.write_with_fallback(batch, || batch.clone())
    }

    /// Like [`write`](Self::write), but what goes to the fallback log is built
    /// by `fallback` only once the primary store has given up. Rows already
    /// exported by an earlier commit can be left out of it this way.
    pub fn write_with_fallback<B>(&self, batch: &CommitBatch, fallback: B) -> WriteOutcome
    where
        B: FnOnce() -> CommitBatch,
    {
        if batch.is_empty() {
            return WriteOutcome::Persisted { attempts: 0 };
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.primary.commit(batch) {
                Ok(()) => {
                    if attempt > 1 {
                        info!(attempt, records = batch.record_count(), "ledger commit succeeded after retry");
                    }
                    return WriteOutcome::Persisted { attempts: attempt };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "ledger commit failed");
                    last_error = Some(e);
                    if attempt < max_attempts {
                        thread::sleep(backoff(self.retry.base_backoff, attempt));
                    }
                }
            }
        }

        let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
        let export = fallback();
        let appended = if export.is_empty() {
            Ok(0)
        } else {
            self.fallback.append(&export, Utc::now())
        };
        match appended {
            Ok(records) => {
                let warning = format!(
                    "primary store unavailable after {max_attempts} attempts ({cause}); {records} change records exported to fallback log"
                );
                warn!(records, "{warning}");
                WriteOutcome::FallbackExported {
                    attempts: max_attempts,
                    records,
                    warning,
                }
            }
            Err(e) => {
                let warning = format!(
                    "primary store unavailable after {max_attempts} attempts ({cause}); fallback log failed ({e}); batch kept for next commit"
                );
                error!("{warning}");
                WriteOutcome::Unpersisted { warning }
            }
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
