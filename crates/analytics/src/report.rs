//! Report artifacts.
//!
//! A report bundles a markdown narrative, a structured annexure, lineage and
//! methodology for one window. Every number in it is aggregated from the
//! ledger snapshot; the narrative only formats those numbers.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_core::{DateWindow, ReportId};
use carbonledger_emissions::{ActivityType, Dimension, LedgerLine};

use crate::policy::REPORT_TOP_N;
use crate::reader::LedgerSnapshot;
use crate::summary::summarize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedKey {
    pub key: String,
    pub kg_co2e: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub total_kg_co2e: f64,
    pub scope_split: BTreeMap<String, f64>,
    pub category_split: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHotspots {
    pub lanes: Vec<RankedKey>,
    pub suppliers: Vec<RankedKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportAnnexure {
    pub totals: ReportTotals,
    pub top_hotspots: TopHotspots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLineage {
    pub source: String,
    pub tables: Vec<String>,
    pub ledger_line_count: usize,
    pub last_computed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportAssumptions {
    pub methodology: Vec<String>,
    pub exclusions: Vec<String>,
}

/// Persisted once created; never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub report_id: ReportId,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub narrative_md: String,
    pub annexure: ReportAnnexure,
    pub lineage: ReportLineage,
    pub assumptions: ReportAssumptions,
}

pub fn methodology() -> Vec<String> {
    vec![
        "Scope 3 Transport: kgCO2e = distance_km × weight_tons × EF_mode (kgCO2e/ton-km).".to_string(),
        "Scope 3 Purchased Goods: kgCO2e = quantity × supplier intensity (kgCO2e/unit).".to_string(),
        "Scope 2 Electricity: kgCO2e = kWh × grid factor (kgCO2e/kWh).".to_string(),
        "When required inputs are missing, method = fallback_proxy with a documented constant and reduced confidence; no other values are estimated.".to_string(),
    ]
}

fn exclusions() -> Vec<String> {
    vec![
        "Scope 1 (direct) emissions are not modeled.".to_string(),
        "Warehousing, packaging and upstream energy are excluded.".to_string(),
    ]
}

fn top_keys<'a>(
    lines: impl Iterator<Item = &'a LedgerLine>,
    dimension: Dimension,
    n: usize,
) -> Vec<RankedKey> {
    let mut sums: HashMap<&str, f64> = HashMap::new();
    for line in lines {
        if let Some(key) = line.dimension_key(dimension) {
            *sums.entry(key).or_default() += line.kg_co2e;
        }
    }
    let mut ranked: Vec<(&str, f64)> = sums.into_iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| b.total_cmp(a).then_with(|| ka.cmp(kb)));
    ranked
        .into_iter()
        .take(n)
        .map(|(key, kg_co2e)| RankedKey {
            key: key.to_string(),
            kg_co2e,
        })
        .collect()
}

fn ranked_list(keys: &[RankedKey]) -> String {
    if keys.is_empty() {
        return "N/A".to_string();
    }
    keys.iter()
        .map(|k| format!("{} ({:.1} kg)", k.key, k.kg_co2e))
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_list(split: &BTreeMap<String, f64>) -> String {
    if split.is_empty() {
        return "none".to_string();
    }
    split
        .iter()
        .map(|(k, v)| format!("{k}: {v:.2}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a report for `window` from one ledger snapshot.
pub fn build_report(
    snapshot: &LedgerSnapshot,
    window: &DateWindow,
    report_id: ReportId,
    created_at: DateTime<Utc>,
) -> ReportArtifact {
    let summary = summarize(snapshot, window);

    let lanes = top_keys(
        snapshot
            .lines_in(window)
            .filter(|l| l.activity_type == ActivityType::Shipment),
        Dimension::Lane,
        REPORT_TOP_N,
    );
    let suppliers = top_keys(snapshot.lines_in(window), Dimension::Supplier, REPORT_TOP_N);

    let methodology = methodology();
    let exclusions = exclusions();

    let mut md = String::new();
    let _ = writeln!(md, "## Carbon Emissions Summary\n");
    let _ = writeln!(md, "**Reporting period**: {} to {}\n", window.from(), window.to());
    let _ = writeln!(md, "### Boundary");
    let _ = writeln!(md, "- Shipments (transport), purchased goods and facility electricity.");
    let _ = writeln!(md, "- Scope 1 is not modeled.\n");
    let _ = writeln!(md, "### Methodology");
    for m in &methodology {
        let _ = writeln!(md, "- {m}");
    }
    let _ = writeln!(md, "\n### Results");
    let _ = writeln!(md, "- **Total emissions (kgCO2e)**: {:.2}", summary.total_kg_co2e);
    let _ = writeln!(md, "- **Scope split (kgCO2e)**: {}", split_list(&summary.scope_split));
    let _ = writeln!(md, "- **Category split (kgCO2e)**: {}", split_list(&summary.category_split));
    let _ = writeln!(
        md,
        "- **Coverage**: {} ledger lines, average confidence {:.2}\n",
        summary.coverage.activity_count, summary.coverage.avg_confidence
    );
    let _ = writeln!(md, "### Top hotspots");
    let _ = writeln!(md, "- **Top lanes**: {}", ranked_list(&lanes));
    let _ = writeln!(md, "- **Top suppliers**: {}\n", ranked_list(&suppliers));
    let _ = writeln!(md, "### Assumptions & exclusions");
    for e in &exclusions {
        let _ = writeln!(md, "- {e}");
    }
    let _ = writeln!(md, "\n### Data lineage");
    let _ = writeln!(md, "- All numeric values are aggregated from the computed carbon ledger.");

    ReportArtifact {
        report_id,
        period_from: window.from(),
        period_to: window.to(),
        created_at,
        narrative_md: md,
        annexure: ReportAnnexure {
            totals: ReportTotals {
                total_kg_co2e: summary.total_kg_co2e,
                scope_split: summary.scope_split,
                category_split: summary.category_split,
            },
            top_hotspots: TopHotspots { lanes, suppliers },
        },
        lineage: ReportLineage {
            source: "carbon_ledger".to_string(),
            tables: ["carbon_ledger", "shipments", "suppliers", "electricity_bills"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            ledger_line_count: summary.coverage.activity_count,
            last_computed_at: summary.freshness.last_computed_at,
        },
        assumptions: ReportAssumptions {
            methodology,
            exclusions,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    #[test]
    fn report_aggregates_window_and_ranks_top_keys() {
        let mut lines = Vec::new();
        let mut shipments = Vec::new();
        let origins = ["Agra", "Bhopal", "Chennai", "Dehradun", "Erode", "Faridabad", "Gaya"];
        for (i, kg) in [10.0, 70.0, 30.0, 20.0, 60.0, 50.0, 40.0].into_iter().enumerate() {
            let s = shipment(&format!("S{i}"), origins[i], "Delhi", "road", &format!("SUP_{i}"), "2025-01-05");
            lines.extend(shipment_lines(&s, kg, 1.0));
            shipments.push(s);
        }
        lines.push(bill_line("B1", "FAC_1", 100.0, "2025-01-06"));
        let snap = LedgerSnapshot::new(lines, shipments);
        let window = DateWindow::parse("2025-01-01", "2025-01-31").unwrap();

        let r = build_report(&snap, &window, ReportId::new(), at("2025-02-01T00:00:00Z"));
        assert_eq!(r.annexure.totals.total_kg_co2e, 387.0);
        assert_eq!(r.annexure.top_hotspots.lanes.len(), 5);
        assert_eq!(r.annexure.top_hotspots.lanes[0].kg_co2e, 70.0);
        assert_eq!(r.annexure.top_hotspots.suppliers[0].key, "SUP_1");
        assert_eq!(r.annexure.top_hotspots.suppliers[0].kg_co2e, 71.0);
        assert!(r.narrative_md.contains("2025-01-01 to 2025-01-31"));
        assert!(r.narrative_md.contains("387.00"));
        assert_eq!(r.lineage.ledger_line_count, 15);
        assert_eq!(r.assumptions.methodology.len(), 4);
    }

    #[test]
    fn empty_window_report_is_well_formed() {
        let window = DateWindow::parse("2025-01-01", "2025-01-31").unwrap();
        let r = build_report(&LedgerSnapshot::default(), &window, ReportId::new(), at("2025-02-01T00:00:00Z"));
        assert_eq!(r.annexure.totals.total_kg_co2e, 0.0);
        assert!(r.annexure.top_hotspots.lanes.is_empty());
        assert!(r.narrative_md.contains("N/A"));
    }
}
