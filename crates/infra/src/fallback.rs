//! Local change log used when the primary store cannot be written.
//!
//! Each upserted row becomes one JSON line. The log is an append-only record
//! of what the store missed; the pipeline keeps re-sending those keys itself
//! until the store accepts them.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::read_model::CommitBatch;

pub const CHANGE_LOG_FILE: &str = "ledger_changes.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Upsert,
}

/// One row change, as written to the fallback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: String,
    pub key: String,
    pub op: ChangeOp,
    pub recorded_at: DateTime<Utc>,
    pub record: JsonValue,
}

impl ChangeRecord {
    fn upsert<T: Serialize>(
        table: &str,
        key: &str,
        recorded_at: DateTime<Utc>,
        row: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            table: table.to_string(),
            key: key.to_string(),
            op: ChangeOp::Upsert,
            recorded_at,
            record: serde_json::to_value(row)?,
        })
    }

    /// Flatten a batch into change records, entity tables before ledger lines.
    pub fn from_batch(
        batch: &CommitBatch,
        recorded_at: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, serde_json::Error> {
        let mut out = Vec::with_capacity(batch.record_count());
        for s in &batch.shipments {
            out.push(Self::upsert("shipments", &s.shipment_id, recorded_at, s)?);
        }
        for s in &batch.suppliers {
            out.push(Self::upsert("suppliers", &s.supplier_id, recorded_at, s)?);
        }
        for b in &batch.bills {
            out.push(Self::upsert("electricity_bills", &b.bill_id, recorded_at, b)?);
        }
        for l in &batch.lines {
            out.push(Self::upsert("carbon_ledger", l.ledger_id.as_str(), recorded_at, l)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("fallback log io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode change record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for batches the primary store refused.
pub trait FallbackSink: Send + Sync {
    /// Durably record `batch`; returns the number of change records written.
    fn append(&self, batch: &CommitBatch, recorded_at: DateTime<Utc>) -> Result<usize, FallbackError>;
}

impl<F> FallbackSink for Arc<F>
where
    F: FallbackSink + ?Sized,
{
    fn append(&self, batch: &CommitBatch, recorded_at: DateTime<Utc>) -> Result<usize, FallbackError> {
        (**self).append(batch, recorded_at)
    }
}

/// JSON-lines change log under a directory.
#[derive(Debug)]
pub struct JsonlFallbackLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFallbackLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CHANGE_LOG_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record in the log (replay support).
    pub fn read_all(&self) -> Result<Vec<ChangeRecord>, FallbackError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(FallbackError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(FallbackError::from))
            .collect()
    }

    fn io_err(&self, source: std::io::Error) -> FallbackError {
        FallbackError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl FallbackSink for JsonlFallbackLog {
    fn append(&self, batch: &CommitBatch, recorded_at: DateTime<Utc>) -> Result<usize, FallbackError> {
        let records = ChangeRecord::from_batch(batch, recorded_at)?;
        if records.is_empty() {
            return Ok(0);
        }

        // Appends from concurrent writers must not interleave within a batch.
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let mut out = BufWriter::new(file);
        for r in &records {
            serde_json::to_writer(&mut out, r)?;
            out.write_all(b"\n").map_err(|e| self.io_err(e))?;
        }
        out.flush().map_err(|e| self.io_err(e))?;
        out.get_ref().sync_data().map_err(|e| self.io_err(e))?;

        Ok(records.len())
    }
}
