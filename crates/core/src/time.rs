//! Time handling for event streams and reporting windows.
//!
//! Event timestamps arrive as ISO-8601 strings from several feeds. Some carry a
//! trailing `Z`, some a numeric offset, some no zone marker at all. Everything is
//! normalized to a UTC instant before comparison so "latest event wins" is
//! decided on instants, never on raw strings.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse an ISO-8601 event timestamp into a UTC instant.
///
/// Accepted shapes:
/// - `2025-01-10T08:00:00Z` (trailing `Z`/`z` is normalized to `+00:00`)
/// - `2025-01-10T13:30:00+05:30` / `2025-01-10T13:30:00+0530`
/// - `2025-01-10T08:00:00` (no zone marker: interpreted as UTC)
/// - `2025-01-10` (midnight UTC)
pub fn parse_event_time(raw: &str) -> DomainResult<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(DomainError::validation("event_time is empty"));
    }

    let normalized = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => s.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(DomainError::validation(format!("malformed event_time: '{raw}'")))
}

/// Parse a calendar date (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> DomainResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| DomainError::validation(format!("malformed date '{raw}': {e}")))
}

/// Inclusive calendar window `[from, to]`.
///
/// Deserialization goes through [`DateWindow::new`], so an inverted window in a
/// request body is rejected like one built from query parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateWindow")]
pub struct DateWindow {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateWindow {
    from: NaiveDate,
    to: NaiveDate,
}

impl TryFrom<RawDateWindow> for DateWindow {
    type Error = DomainError;

    fn try_from(raw: RawDateWindow) -> Result<Self, Self::Error> {
        DateWindow::new(raw.from, raw.to)
    }
}

impl DateWindow {
    /// Build a window; `from` must not be after `to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> DomainResult<Self> {
        if from > to {
            return Err(DomainError::validation(format!(
                "window start {from} is after window end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    /// Parse a window from two `YYYY-MM-DD` strings.
    pub fn parse(from: &str, to: &str) -> DomainResult<Self> {
        Self::new(parse_date(from)?, parse_date(to)?)
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }

    /// Trailing sub-window of `days` days ending at `to`, clipped at `from`.
    pub fn trailing(&self, days: i64) -> DateWindow {
        let start = self
            .to
            .checked_sub_signed(Duration::days(days.max(1) - 1))
            .unwrap_or(self.from);
        DateWindow {
            from: start.max(self.from),
            to: self.to,
        }
    }

    /// The `days`-day window immediately preceding `self`, clipped at `floor`.
    ///
    /// Returns `None` when nothing remains after clipping.
    pub fn preceding(&self, days: i64, floor: NaiveDate) -> Option<DateWindow> {
        let to = self.from.pred_opt()?;
        let from = to
            .checked_sub_signed(Duration::days(days.max(1) - 1))
            .unwrap_or(NaiveDate::MIN)
            .max(floor);
        if from > to {
            return None;
        }
        Some(DateWindow { from, to })
    }
}

impl core::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}
