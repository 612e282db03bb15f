//! Activity feeds and reference data on disk.
//!
//! Feeds are append-only JSON-lines files, one per entity type, tailed by byte
//! offset. Malformed rows are logged and skipped. The emission factor file is
//! reference data: a bad file is fatal at startup and ignored (old table kept)
//! on reload.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use carbonledger_emissions::{EmissionFactor, FactorError, FactorReference, FactorTable};
use carbonledger_events::{ActivityEnvelope, ActivityEvent, EntityKind};

pub const FACTORS_FILE: &str = "emission_factors.jsonl";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("file not found: {0}")]
    Missing(PathBuf),

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("invalid factor reference: {0}")]
    InvalidReference(#[from] FactorError),
}

fn io_error(path: &Path, source: std::io::Error) -> FeedError {
    if source.kind() == std::io::ErrorKind::NotFound {
        FeedError::Missing(path.to_path_buf())
    } else {
        FeedError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Load and validate the emission factor reference.
pub fn load_factors(path: &Path) -> Result<FactorTable, FeedError> {
    let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let mut factors = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let factor: EmissionFactor = serde_json::from_str(line).map_err(|e| FeedError::Malformed {
            path: path.to_path_buf(),
            line: idx as u64 + 1,
            message: e.to_string(),
        })?;
        factors.push(factor);
    }
    Ok(FactorTable::from_factors(factors)?)
}

/// Reloads the factor file when its modification time changes.
#[derive(Debug)]
pub struct FactorWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl FactorWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// First load. Errors here should stop the process.
    pub fn load(&mut self) -> Result<FactorTable, FeedError> {
        let modified = self.modified();
        let table = load_factors(&self.path)?;
        self.last_modified = modified;
        info!(path = %self.path.display(), factor_count = table.len(), "factor reference loaded");
        Ok(table)
    }

    /// Swap a fresh table into `reference` if the file changed.
    ///
    /// Returns `true` when a new table was installed. A file that fails to load
    /// is logged and the current table stays in effect.
    pub fn poll(&mut self, reference: &FactorReference) -> bool {
        let modified = self.modified();
        if modified.is_none() || modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;

        match load_factors(&self.path) {
            Ok(table) => {
                info!(path = %self.path.display(), factor_count = table.len(), "factor reference reloaded");
                reference.replace(table);
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "factor reload failed; keeping current table");
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FeedCursor {
    offset: u64,
    line: u64,
    /// File length seen by the previous poll when it ended in an unterminated row.
    stalled_at: Option<u64>,
}

/// Incremental reader over the three activity feeds in one directory.
///
/// Rows are consumed once newline-terminated. A final row without a newline is
/// consumed when the file has not grown for one full poll and the row is a
/// complete JSON value; a half-written row is left for a later poll.
#[derive(Debug)]
pub struct FeedTailer {
    dir: PathBuf,
    cursors: BTreeMap<EntityKind, FeedCursor>,
    next_seq: u64,
}

impl FeedTailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cursors: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every new row from every feed.
    ///
    /// A feed file that does not exist yet is treated as empty.
    pub fn poll(&mut self) -> Result<Vec<ActivityEnvelope>, FeedError> {
        let mut out = Vec::new();
        for kind in EntityKind::ALL {
            self.poll_feed(kind, &mut out)?;
        }
        Ok(out)
    }

    fn poll_feed(&mut self, kind: EntityKind, out: &mut Vec<ActivityEnvelope>) -> Result<(), FeedError> {
        let path = self.dir.join(kind.feed_file());
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(&path, e)),
        };

        let mut cursor = self.cursors.get(&kind).copied().unwrap_or_default();
        let len = file.metadata().map_err(|e| io_error(&path, e))?.len();
        if len < cursor.offset {
            warn!(feed = kind.feed_file(), "feed shrank; reading from the start");
            cursor = FeedCursor::default();
        }

        file.seek(SeekFrom::Start(cursor.offset))
            .map_err(|e| io_error(&path, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_error(&path, e))?;

        let complete = buf.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        if complete > 0 {
            for raw in buf[..complete - 1].split(|b| *b == b'\n') {
                self.consume_row(kind, &mut cursor, raw, out);
            }
        }
        cursor.offset += complete as u64;

        let tail = &buf[complete..];
        if tail.iter().all(u8::is_ascii_whitespace) {
            cursor.stalled_at = None;
        } else if cursor.stalled_at == Some(len) && serde_json::from_slice::<serde_json::Value>(tail).is_ok() {
            debug!(feed = kind.feed_file(), "consuming unterminated final row");
            self.consume_row(kind, &mut cursor, tail, out);
            cursor.offset += tail.len() as u64;
            cursor.stalled_at = None;
        } else {
            cursor.stalled_at = Some(len);
        }

        self.cursors.insert(kind, cursor);
        Ok(())
    }

    fn consume_row(&mut self, kind: EntityKind, cursor: &mut FeedCursor, raw: &[u8], out: &mut Vec<ActivityEnvelope>) {
        cursor.line += 1;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        match self.parse_row(kind, raw) {
            Ok(envelope) => out.push(envelope),
            Err(message) => {
                warn!(feed = kind.feed_file(), line = cursor.line, error = %message, "skipping malformed feed row");
            }
        }
    }

    fn parse_row(&mut self, kind: EntityKind, raw: &[u8]) -> Result<ActivityEnvelope, String> {
        let row: serde_json::Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
        let event = ActivityEvent::from_feed_row(kind, row).map_err(|e| e.to_string())?;
        let envelope = ActivityEnvelope::from_activity(event, self.next_seq).map_err(|e| e.to_string())?;
        self.next_seq += 1;
        Ok(envelope)
    }
}
