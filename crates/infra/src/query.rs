//! Query facade over the ledger store.
//!
//! Takes request parameters as they arrive from a caller (strings, optional
//! numbers), validates them, takes exactly one ledger snapshot and delegates to
//! the analytics functions. Report generation is the only operation that
//! writes, and it writes only to the report store.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use carbonledger_analytics::hotspots::check_hotspot_limit;
use carbonledger_analytics::summary::Freshness;
use carbonledger_analytics::{
    AnalyticsError, CarbonSummary, Hotspot, HotspotExplanation, LedgerPage, LedgerQuery,
    LedgerReader, LedgerSnapshot, OptimizationResult, OptimizeRequest, OptimizerPolicy,
    ReportArtifact, ScenarioRequest, ScenarioResult, build_report, explain_hotspot, list_ledger,
    optimize, rank_hotspots, simulate, summarize,
};
use carbonledger_core::{DateWindow, DomainError, ReportId};
use carbonledger_emissions::{Category, Dimension, Scope};

use crate::read_model::{ReportStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<AnalyticsError> for QueryError {
    fn from(value: AnalyticsError) -> Self {
        match value {
            AnalyticsError::InvalidRequest(m) => QueryError::InvalidRequest(m),
            AnalyticsError::NotFound(m) => QueryError::NotFound(m),
            AnalyticsError::Read(m) => QueryError::Unavailable(m),
        }
    }
}

impl From<DomainError> for QueryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound => QueryError::NotFound("resource".to_string()),
            other => QueryError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(value: StoreError) -> Self {
        QueryError::Unavailable(value.to_string())
    }
}

pub struct CarbonQueryService<R, P> {
    reader: R,
    reports: P,
    policy: OptimizerPolicy,
}

impl<R, P> CarbonQueryService<R, P>
where
    R: LedgerReader,
    P: ReportStore,
{
    pub fn new(reader: R, reports: P) -> Self {
        Self {
            reader,
            reports,
            policy: OptimizerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OptimizerPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn snapshot(&self, window: Option<&DateWindow>) -> Result<LedgerSnapshot, QueryError> {
        self.reader.snapshot(window).map_err(|e| {
            warn!(error = %e, "ledger snapshot failed");
            QueryError::from(e)
        })
    }

    pub fn summary(&self, from: &str, to: &str) -> Result<CarbonSummary, QueryError> {
        let window = DateWindow::parse(from, to)?;
        let snapshot = self.snapshot(Some(&window))?;
        Ok(summarize(&snapshot, &window))
    }

    pub fn ledger(
        &self,
        from: &str,
        to: &str,
        scope: Option<u8>,
        category: Option<&str>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<LedgerPage, QueryError> {
        let window = DateWindow::parse(from, to)?;
        let scope = scope.map(Scope::try_from).transpose()?;
        let category = category.map(str::parse::<Category>).transpose()?;
        let query = LedgerQuery::new(window, scope, category, limit, offset)?;

        let snapshot = self.snapshot(Some(&window))?;
        Ok(list_ledger(&snapshot, &query))
    }

    /// Ranked hotspots for one dimension. Trends need the preceding week, so the
    /// snapshot covers the whole ledger.
    pub fn hotspots(
        &self,
        dimension: &str,
        from: &str,
        to: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Hotspot>, QueryError> {
        let dimension: Dimension = dimension.parse()?;
        let window = DateWindow::parse(from, to)?;
        let limit = check_hotspot_limit(limit)?;

        let snapshot = self.snapshot(None)?;
        Ok(rank_hotspots(&snapshot, dimension, &window, limit, Utc::now()))
    }

    pub fn explain_hotspot(&self, hotspot_id: &str) -> Result<HotspotExplanation, QueryError> {
        carbonledger_analytics::parse_hotspot_id(hotspot_id)?;
        let snapshot = self.snapshot(None)?;
        Ok(explain_hotspot(&snapshot, hotspot_id)?)
    }

    pub fn simulate(&self, request: &ScenarioRequest) -> Result<ScenarioResult, QueryError> {
        let snapshot = self.snapshot(Some(&request.window))?;
        Ok(simulate(&snapshot, request)?)
    }

    pub fn optimize(&self, request: &OptimizeRequest) -> Result<OptimizationResult, QueryError> {
        let snapshot = self.snapshot(Some(&request.window))?;
        Ok(optimize(&snapshot, request, &self.policy)?)
    }

    /// Build a report for the window and persist it.
    pub fn generate_report(&self, from: &str, to: &str) -> Result<ReportArtifact, QueryError> {
        let window = DateWindow::parse(from, to)?;
        let snapshot = self.snapshot(Some(&window))?;
        let report = build_report(&snapshot, &window, ReportId::new(), Utc::now());

        self.reports.insert_report(&report)?;
        info!(report_id = %report.report_id, period_from = %window.from(), period_to = %window.to(), "report generated");
        Ok(report)
    }

    pub fn get_report(&self, report_id: &str) -> Result<ReportArtifact, QueryError> {
        let id: ReportId = report_id.trim().parse()?;
        self.reports
            .get_report(id)?
            .ok_or_else(|| QueryError::NotFound(format!("report {id}")))
    }

    /// Max `computed_at` over the whole ledger.
    pub fn freshness(&self) -> Result<Freshness, QueryError> {
        Ok(Freshness {
            last_computed_at: self.reader.last_computed_at()?,
        })
    }
}
