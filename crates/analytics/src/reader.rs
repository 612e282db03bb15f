use std::sync::Arc;

use chrono::{DateTime, Utc};

use carbonledger_core::DateWindow;
use carbonledger_emissions::{LedgerLine, ShipmentState};

use crate::error::AnalyticsError;

/// Immutable view of the ledger (plus resolved shipments) as of one commit.
///
/// Cloning is cheap; the underlying vectors are shared.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    lines: Arc<Vec<LedgerLine>>,
    shipments: Arc<Vec<ShipmentState>>,
}

impl LedgerSnapshot {
    pub fn new(lines: Vec<LedgerLine>, shipments: Vec<ShipmentState>) -> Self {
        Self::from_shared(Arc::new(lines), Arc::new(shipments))
    }

    pub fn from_shared(lines: Arc<Vec<LedgerLine>>, shipments: Arc<Vec<ShipmentState>>) -> Self {
        Self { lines, shipments }
    }

    pub fn lines(&self) -> &[LedgerLine] {
        &self.lines
    }

    pub fn shipments(&self) -> &[ShipmentState] {
        &self.shipments
    }

    /// Lines whose period date falls in `window`.
    pub fn lines_in<'a>(&'a self, window: &'a DateWindow) -> impl Iterator<Item = &'a LedgerLine> + 'a {
        self.lines.iter().filter(move |l| window.contains(l.period_date))
    }

    pub fn last_computed_at(&self) -> Option<DateTime<Utc>> {
        self.lines.iter().map(|l| l.computed_at).max()
    }
}

/// Read side of the ledger store.
///
/// Every analytics call takes exactly one snapshot, so a commit landing mid-call
/// is never half visible.
pub trait LedgerReader: Send + Sync {
    /// Consistent snapshot. `window` narrows what must be included; an
    /// implementation may return more lines than asked for, never fewer.
    fn snapshot(&self, window: Option<&DateWindow>) -> Result<LedgerSnapshot, AnalyticsError>;

    /// Max `computed_at` over the whole ledger.
    fn last_computed_at(&self) -> Result<Option<DateTime<Utc>>, AnalyticsError> {
        Ok(self.snapshot(None)?.last_computed_at())
    }
}

impl<R> LedgerReader for Arc<R>
where
    R: LedgerReader + ?Sized,
{
    fn snapshot(&self, window: Option<&DateWindow>) -> Result<LedgerSnapshot, AnalyticsError> {
        (**self).snapshot(window)
    }

    fn last_computed_at(&self) -> Result<Option<DateTime<Utc>>, AnalyticsError> {
        (**self).last_computed_at()
    }
}
