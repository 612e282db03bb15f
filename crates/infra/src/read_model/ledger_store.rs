use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use carbonledger_analytics::{AnalyticsError, LedgerReader, LedgerSnapshot, ReportArtifact};
use carbonledger_core::{DateWindow, ReportId};
use carbonledger_emissions::{
    ElectricityBillState, LedgerLine, LedgerLineId, ShipmentState, SupplierState,
};

/// Everything one pipeline commit writes: entity snapshots plus ledger lines.
///
/// A store applies a batch atomically; readers see all of it or none of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitBatch {
    pub shipments: Vec<ShipmentState>,
    pub suppliers: Vec<SupplierState>,
    pub bills: Vec<ElectricityBillState>,
    pub lines: Vec<LedgerLine>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.shipments.is_empty()
            && self.suppliers.is_empty()
            && self.bills.is_empty()
            && self.lines.is_empty()
    }

    /// Number of rows the batch upserts across all tables.
    pub fn record_count(&self) -> usize {
        self.shipments.len() + self.suppliers.len() + self.bills.len() + self.lines.len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, pool closed, no runtime).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected a statement.
    #[error("store query failed: {0}")]
    Query(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AnalyticsError {
    fn from(value: StoreError) -> Self {
        AnalyticsError::Read(value.to_string())
    }
}

/// Write side of the ledger store (entity tables + ledger).
pub trait LedgerStore: Send + Sync {
    /// Upsert every row of `batch` in one transaction.
    ///
    /// Ledger upserts are keyed by ledger id. A line whose content is unchanged
    /// keeps its stored `computed_at`.
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError>;
}

/// Persisted report artifacts (write-once).
pub trait ReportStore: Send + Sync {
    fn insert_report(&self, report: &ReportArtifact) -> Result<(), StoreError>;

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportArtifact>, StoreError>;
}

/// Async access to a database-backed ledger store.
///
/// The sync [`LedgerStore`]/[`LedgerReader`] impls of such stores block on
/// these futures, so they must be called off the runtime's own threads.
#[async_trait::async_trait]
pub trait AsyncLedgerStore: Send + Sync {
    async fn commit_batch(&self, batch: &CommitBatch) -> Result<(), StoreError>;

    /// Lines and shipments with a period date in `window` (everything when `None`),
    /// read in one repeatable-read transaction.
    async fn load_snapshot(&self, window: Option<DateWindow>) -> Result<LedgerSnapshot, StoreError>;

    async fn max_computed_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }
}

impl<S> ReportStore for Arc<S>
where
    S: ReportStore + ?Sized,
{
    fn insert_report(&self, report: &ReportArtifact) -> Result<(), StoreError> {
        (**self).insert_report(report)
    }

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportArtifact>, StoreError> {
        (**self).get_report(report_id)
    }
}

#[derive(Debug, Default)]
struct Tables {
    shipments: BTreeMap<String, ShipmentState>,
    suppliers: BTreeMap<String, SupplierState>,
    bills: BTreeMap<String, ElectricityBillState>,
    lines: BTreeMap<LedgerLineId, LedgerLine>,
}

impl Tables {
    fn apply(&mut self, batch: &CommitBatch) {
        for s in &batch.shipments {
            self.shipments.insert(s.shipment_id.clone(), s.clone());
        }
        for s in &batch.suppliers {
            self.suppliers.insert(s.supplier_id.clone(), s.clone());
        }
        for b in &batch.bills {
            self.bills.insert(b.bill_id.clone(), b.clone());
        }
        for line in &batch.lines {
            match self.lines.get(&line.ledger_id) {
                Some(existing) if existing.same_content(line) => {}
                _ => {
                    self.lines.insert(line.ledger_id.clone(), line.clone());
                }
            }
        }
    }

    fn view(&self) -> LedgerSnapshot {
        LedgerSnapshot::new(
            self.lines.values().cloned().collect(),
            self.shipments.values().cloned().collect(),
        )
    }
}

/// In-memory ledger store for tests/dev and for running without a database.
///
/// Each commit rebuilds an immutable [`LedgerSnapshot`] and swaps it in, so a
/// reader never observes a partially applied batch.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
    view: RwLock<LedgerSnapshot>,
    reports: RwLock<HashMap<ReportId, ReportArtifact>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, ledger_id: &str) -> Option<LedgerLine> {
        let tables = self.tables.read().ok()?;
        tables.lines.get(&LedgerLineId::from(ledger_id.to_string())).cloned()
    }

    pub fn shipment(&self, shipment_id: &str) -> Option<ShipmentState> {
        let tables = self.tables.read().ok()?;
        tables.shipments.get(shipment_id).cloned()
    }

    pub fn supplier(&self, supplier_id: &str) -> Option<SupplierState> {
        let tables = self.tables.read().ok()?;
        tables.suppliers.get(supplier_id).cloned()
    }

    pub fn bill(&self, bill_id: &str) -> Option<ElectricityBillState> {
        let tables = self.tables.read().ok()?;
        tables.bills.get(bill_id).cloned()
    }

    pub fn line_count(&self) -> usize {
        self.tables.read().map(|t| t.lines.len()).unwrap_or(0)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Unavailable("ledger tables lock poisoned".to_string()))?;
        tables.apply(batch);

        let view = tables.view();
        let mut current = self
            .view
            .write()
            .map_err(|_| StoreError::Unavailable("ledger view lock poisoned".to_string()))?;
        *current = view;
        Ok(())
    }
}

impl LedgerReader for InMemoryLedgerStore {
    fn snapshot(&self, _window: Option<&DateWindow>) -> Result<LedgerSnapshot, AnalyticsError> {
        self.view
            .read()
            .map(|v| v.clone())
            .map_err(|_| AnalyticsError::Read("ledger view lock poisoned".to_string()))
    }

    fn last_computed_at(&self) -> Result<Option<DateTime<Utc>>, AnalyticsError> {
        Ok(self.snapshot(None)?.last_computed_at())
    }
}

impl ReportStore for InMemoryLedgerStore {
    fn insert_report(&self, report: &ReportArtifact) -> Result<(), StoreError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| StoreError::Unavailable("report lock poisoned".to_string()))?;
        if reports.contains_key(&report.report_id) {
            return Err(StoreError::Query(format!(
                "report {} already exists",
                report.report_id
            )));
        }
        reports.insert(report.report_id, report.clone());
        Ok(())
    }

    fn get_report(&self, report_id: ReportId) -> Result<Option<ReportArtifact>, StoreError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StoreError::Unavailable("report lock poisoned".to_string()))?;
        Ok(reports.get(&report_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonledger_core::parse_event_time;
    use carbonledger_emissions::{
        ActivityType, Assumptions, Category, Lineage, Method, Scope,
    };

    fn line(id: &str, kg: f64, computed_at: &str) -> LedgerLine {
        LedgerLine {
            ledger_id: LedgerLineId::compose(ActivityType::ElectricityBill, id, Category::Electricity),
            activity_id: id.to_string(),
            activity_type: ActivityType::ElectricityBill,
            scope: Scope::Scope2,
            category: Category::Electricity,
            kg_co2e: kg,
            method: Method::ActivityFactor,
            confidence: 0.8,
            factor_ref: None,
            lineage: Lineage::default(),
            assumptions: Assumptions::default(),
            computed_at: parse_event_time(computed_at).unwrap(),
            period_date: carbonledger_core::parse_date("2025-01-05").unwrap(),
            supplier_id: None,
            lane_id: None,
            sku: None,
            facility_id: Some("FAC_1".to_string()),
        }
    }

    fn batch(lines: Vec<LedgerLine>) -> CommitBatch {
        CommitBatch {
            lines,
            ..CommitBatch::default()
        }
    }

    #[test]
    fn unchanged_line_keeps_its_computed_at() {
        let store = InMemoryLedgerStore::new();
        store.commit(&batch(vec![line("B1", 70.0, "2025-02-01T00:00:00Z")])).unwrap();
        store.commit(&batch(vec![line("B1", 70.0, "2025-02-02T00:00:00Z")])).unwrap();

        let stored = store.line("electricity_bill:B1:electricity").unwrap();
        assert_eq!(stored.computed_at, parse_event_time("2025-02-01T00:00:00Z").unwrap());
        assert_eq!(store.line_count(), 1);
    }

    #[test]
    fn changed_line_replaces_the_stored_one() {
        let store = InMemoryLedgerStore::new();
        store.commit(&batch(vec![line("B1", 70.0, "2025-02-01T00:00:00Z")])).unwrap();
        store.commit(&batch(vec![line("B1", 140.0, "2025-02-02T00:00:00Z")])).unwrap();

        let stored = store.line("electricity_bill:B1:electricity").unwrap();
        assert_eq!(stored.kg_co2e, 140.0);
        assert_eq!(stored.computed_at, parse_event_time("2025-02-02T00:00:00Z").unwrap());
    }

    #[test]
    fn snapshots_taken_before_a_commit_do_not_change() {
        let store = InMemoryLedgerStore::new();
        store.commit(&batch(vec![line("B1", 70.0, "2025-02-01T00:00:00Z")])).unwrap();
        let before = store.snapshot(None).unwrap();

        store.commit(&batch(vec![line("B2", 10.0, "2025-02-01T00:00:00Z")])).unwrap();
        assert_eq!(before.lines().len(), 1);
        assert_eq!(store.snapshot(None).unwrap().lines().len(), 2);
    }

    #[test]
    fn reports_are_write_once() {
        let store = InMemoryLedgerStore::new();
        let snapshot = store.snapshot(None).unwrap();
        let window = DateWindow::parse("2025-01-01", "2025-01-31").unwrap();
        let report = carbonledger_analytics::build_report(
            &snapshot,
            &window,
            ReportId::new(),
            parse_event_time("2025-02-01T00:00:00Z").unwrap(),
        );

        store.insert_report(&report).unwrap();
        assert!(store.insert_report(&report).is_err());
        assert_eq!(store.get_report(report.report_id).unwrap(), Some(report));
        assert_eq!(store.get_report(ReportId::new()).unwrap(), None);
    }
}
