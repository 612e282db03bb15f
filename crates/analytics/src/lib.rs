//! `carbonledger-analytics`
//!
//! Read-only analytics over the emissions ledger: summaries, hotspot rankings,
//! what-if scenarios, rule-based recommendations and report artifacts.
//!
//! Everything here is a pure function of one [`LedgerSnapshot`]. Nothing in
//! this crate mutates the ledger, so calls may run in parallel.

pub mod error;
pub mod hotspots;
pub mod optimizer;
pub mod policy;
pub mod reader;
pub mod report;
pub mod scenario;
pub mod summary;

#[cfg(test)]
mod fixtures;

pub use error::AnalyticsError;
pub use hotspots::{Hotspot, HotspotExplanation, explain_hotspot, parse_hotspot_id, rank_hotspots};
pub use optimizer::{
    OptimizationResult, OptimizeRequest, OptimizerConstraints, Recommendation, optimize,
};
pub use policy::OptimizerPolicy;
pub use reader::{LedgerReader, LedgerSnapshot};
pub use report::{ReportAnnexure, ReportArtifact, build_report};
pub use scenario::{ScenarioFilters, ScenarioParameters, ScenarioRequest, ScenarioResult, simulate};
pub use summary::{CarbonSummary, LedgerPage, LedgerQuery, list_ledger, summarize};
