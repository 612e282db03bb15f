//! What-if scenario simulation.
//!
//! The baseline always comes from the computed ledger; a scenario is derived
//! from it by one named transformation. Nothing here is persisted.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use carbonledger_core::DateWindow;
use carbonledger_emissions::{ActivityType, Category, ShipmentState};

use crate::error::{AnalyticsError, check_pct};
use crate::policy::{
    CONSOLIDATION_EFFECTIVENESS, DEFAULT_COST_PER_TKM, DEFAULT_LEAD_TIME_DAYS, mode_shift_ratio,
};
use crate::reader::LedgerSnapshot;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    ModeShift,
    SupplierIntensityReduction,
    DistanceReduction,
    Consolidation,
}

impl ScenarioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioType::ModeShift => "mode_shift",
            ScenarioType::SupplierIntensityReduction => "supplier_intensity_reduction",
            ScenarioType::DistanceReduction => "distance_reduction",
            ScenarioType::Consolidation => "consolidation",
        }
    }
}

impl FromStr for ScenarioType {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mode_shift" => Ok(ScenarioType::ModeShift),
            "supplier_intensity_reduction" => Ok(ScenarioType::SupplierIntensityReduction),
            "distance_reduction" => Ok(ScenarioType::DistanceReduction),
            "consolidation" => Ok(ScenarioType::Consolidation),
            other => Err(AnalyticsError::invalid(format!("unsupported scenario_type '{other}'"))),
        }
    }
}

/// Which shipments a scenario applies to. Empty lists mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFilters {
    #[serde(default)]
    pub lane_ids: Vec<String>,
    #[serde(default)]
    pub supplier_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParameters {
    #[serde(default)]
    pub from_mode: Option<String>,
    #[serde(default)]
    pub to_mode: Option<String>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub reduction_pct: Option<f64>,
}

/// Scenario request as received from callers.
///
/// `cost_model` keys: `{mode}_cost_per_tkm`, `default_cost_per_tkm`.
/// `lead_time_model` keys: `{mode}_days`, `default_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRequest {
    pub window: DateWindow,
    pub scenario_type: String,
    #[serde(default)]
    pub filters: ScenarioFilters,
    #[serde(default)]
    pub parameters: ScenarioParameters,
    #[serde(default)]
    pub cost_model: BTreeMap<String, f64>,
    #[serde(default)]
    pub lead_time_model: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub baseline_carbon_kg: f64,
    pub scenario_carbon_kg: f64,
    pub delta_carbon_kg: f64,
    pub delta_carbon_pct: f64,
    pub baseline_cost: f64,
    pub scenario_cost: f64,
    pub delta_cost: f64,
    pub baseline_lead_time_days: f64,
    pub scenario_lead_time_days: f64,
    pub delta_lead_time_days: f64,
    pub impacted_activity_count: usize,
    pub assumptions_used: JsonValue,
}

/// A validated transformation.
#[derive(Debug, Clone, PartialEq)]
enum Transformation {
    ModeShift { from: String, to: String, share: f64 },
    SupplierReduction { supplier_id: String, share: f64 },
    DistanceReduction { share: f64 },
    Consolidation { share: f64 },
}

impl Transformation {
    fn from_request(kind: ScenarioType, p: &ScenarioParameters) -> Result<Self, AnalyticsError> {
        let percentage = check_pct("percentage", p.percentage.unwrap_or(0.0))? / 100.0;
        Ok(match kind {
            ScenarioType::ModeShift => {
                let from = non_blank(&p.from_mode);
                let to = non_blank(&p.to_mode);
                match (from, to) {
                    (Some(from), Some(to)) => Transformation::ModeShift {
                        from,
                        to,
                        share: percentage,
                    },
                    _ => {
                        return Err(AnalyticsError::invalid(
                            "mode_shift requires from_mode and to_mode",
                        ));
                    }
                }
            }
            ScenarioType::SupplierIntensityReduction => {
                let supplier_id = non_blank(&p.supplier_id).ok_or_else(|| {
                    AnalyticsError::invalid("supplier_intensity_reduction requires supplier_id")
                })?;
                let share = check_pct("reduction_pct", p.reduction_pct.unwrap_or(0.0))? / 100.0;
                Transformation::SupplierReduction { supplier_id, share }
            }
            ScenarioType::DistanceReduction => Transformation::DistanceReduction { share: percentage },
            ScenarioType::Consolidation => Transformation::Consolidation { share: percentage },
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Shipments in the window matching the filters, ordered by shipment id.
fn matched_shipments<'a>(
    snapshot: &'a LedgerSnapshot,
    window: &DateWindow,
    filters: &ScenarioFilters,
) -> Vec<&'a ShipmentState> {
    let mut out: Vec<&ShipmentState> = snapshot
        .shipments()
        .iter()
        .filter(|s| window.contains(s.period_date))
        .filter(|s| filters.lane_ids.is_empty() || filters.lane_ids.contains(&s.lane_id))
        .filter(|s| {
            filters.supplier_ids.is_empty()
                || s.supplier_id
                    .as_ref()
                    .is_some_and(|id| filters.supplier_ids.contains(id))
        })
        .collect();
    out.sort_by(|a, b| a.shipment_id.cmp(&b.shipment_id));
    out
}

/// Ledger sum over lines of the given shipments (transport and purchased goods).
fn ledger_sum(
    snapshot: &LedgerSnapshot,
    shipment_ids: &HashSet<&str>,
    category: Option<Category>,
) -> f64 {
    snapshot
        .lines()
        .iter()
        .filter(|l| {
            matches!(
                l.activity_type,
                ActivityType::Shipment | ActivityType::PurchasedGoods
            )
        })
        .filter(|l| category.is_none_or(|c| l.category == c))
        .filter(|l| shipment_ids.contains(l.activity_id.as_str()))
        .fold(0.0, |acc, l| acc + l.kg_co2e)
}

fn cost_rate(model: &BTreeMap<String, f64>, mode: &str) -> f64 {
    model
        .get(&format!("{mode}_cost_per_tkm"))
        .or_else(|| model.get("default_cost_per_tkm"))
        .copied()
        .unwrap_or(DEFAULT_COST_PER_TKM)
}

fn lead_days(model: &BTreeMap<String, f64>, mode: &str) -> f64 {
    model
        .get(&format!("{mode}_days"))
        .or_else(|| model.get("default_days"))
        .copied()
        .unwrap_or(DEFAULT_LEAD_TIME_DAYS)
}

/// Cost proxy: Σ rate(mode) × ton-km. Missing distance or weight counts as zero ton-km.
fn cost_proxy<'a>(modes: impl Iterator<Item = (&'a ShipmentState, &'a str)>, model: &BTreeMap<String, f64>) -> f64 {
    modes.fold(0.0, |acc, (s, mode)| {
        let tkm = s.distance_km.unwrap_or(0.0).max(0.0) * s.weight_tons.unwrap_or(0.0).max(0.0);
        acc + cost_rate(model, mode) * tkm
    })
}

/// Lead-time proxy: mean days per mode over the shipments.
fn lead_time_proxy<'a>(modes: impl Iterator<Item = (&'a ShipmentState, &'a str)>, model: &BTreeMap<String, f64>) -> f64 {
    let (sum, n) = modes.fold((0.0, 0usize), |(sum, n), (_, mode)| (sum + lead_days(model, mode), n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

pub fn simulate(snapshot: &LedgerSnapshot, req: &ScenarioRequest) -> Result<ScenarioResult, AnalyticsError> {
    let kind: ScenarioType = req.scenario_type.parse()?;
    let transformation = Transformation::from_request(kind, &req.parameters)?;

    let shipments = matched_shipments(snapshot, &req.window, &req.filters);
    let all_ids: HashSet<&str> = shipments.iter().map(|s| s.shipment_id.as_str()).collect();
    let baseline = ledger_sum(snapshot, &all_ids, None);

    // Mode used for cost/lead-time after the scenario, per shipment.
    let mut scenario_modes: Vec<&str> = shipments.iter().map(|s| s.mode.as_str()).collect();

    let mut assumptions = json!({
        "scenario_type": kind.as_str(),
        "parameters": req.parameters,
        "filters": req.filters,
        "window": { "from": req.window.from(), "to": req.window.to() },
    });

    let (scenario, impacted) = match &transformation {
        Transformation::ModeShift { from, to, share } => {
            let candidates: Vec<usize> = shipments
                .iter()
                .enumerate()
                .filter(|(_, s)| s.mode.eq_ignore_ascii_case(from))
                .map(|(i, _)| i)
                .collect();
            let impacted = ((candidates.len() as f64) * share).round() as usize;
            let shifted = &candidates[..impacted.min(candidates.len())];

            let ratio = mode_shift_ratio(from, to);
            let shifted_ids: HashSet<&str> =
                shifted.iter().map(|&i| shipments[i].shipment_id.as_str()).collect();
            let shifted_kg = ledger_sum(snapshot, &shifted_ids, Some(Category::Transport));
            for &i in shifted {
                scenario_modes[i] = to.as_str();
            }

            assumptions["ef_ratio_used"] = json!(ratio);
            (baseline - shifted_kg + shifted_kg * ratio, shifted.len())
        }
        Transformation::SupplierReduction { supplier_id, share } => {
            let (kg, n) = snapshot
                .lines()
                .iter()
                .filter(|l| l.category == Category::PurchasedGoods)
                .filter(|l| l.supplier_id.as_deref() == Some(supplier_id.as_str()))
                .filter(|l| all_ids.contains(l.activity_id.as_str()))
                .fold((0.0, 0usize), |(kg, n), l| (kg + l.kg_co2e, n + 1));

            assumptions["reduction_pct"] = json!(share);
            (baseline - kg * share, n)
        }
        Transformation::DistanceReduction { share } => {
            assumptions["distance_reduction_pct"] = json!(share);
            (baseline * (1.0 - share), shipments.len())
        }
        Transformation::Consolidation { share } => {
            let effective = share * CONSOLIDATION_EFFECTIVENESS;
            assumptions["consolidation_effective_pct"] = json!(effective);
            (baseline * (1.0 - effective), shipments.len())
        }
    };

    let baseline_cost = cost_proxy(
        shipments.iter().map(|s| (*s, s.mode.as_str())),
        &req.cost_model,
    );
    let scenario_cost = cost_proxy(
        shipments.iter().copied().zip(scenario_modes.iter().copied()),
        &req.cost_model,
    );
    let baseline_lt = lead_time_proxy(
        shipments.iter().map(|s| (*s, s.mode.as_str())),
        &req.lead_time_model,
    );
    let scenario_lt = lead_time_proxy(
        shipments.iter().copied().zip(scenario_modes.iter().copied()),
        &req.lead_time_model,
    );

    let delta = scenario - baseline;
    Ok(ScenarioResult {
        baseline_carbon_kg: baseline,
        scenario_carbon_kg: scenario,
        delta_carbon_kg: delta,
        delta_carbon_pct: if baseline > 0.0 { delta / baseline * 100.0 } else { 0.0 },
        baseline_cost,
        scenario_cost,
        delta_cost: scenario_cost - baseline_cost,
        baseline_lead_time_days: baseline_lt,
        scenario_lead_time_days: scenario_lt,
        delta_lead_time_days: scenario_lt - baseline_lt,
        impacted_activity_count: impacted,
        assumptions_used: assumptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    fn request(kind: &str, parameters: ScenarioParameters) -> ScenarioRequest {
        ScenarioRequest {
            window: DateWindow::parse("2025-01-01", "2025-01-31").unwrap(),
            scenario_type: kind.to_string(),
            filters: ScenarioFilters::default(),
            parameters,
            cost_model: BTreeMap::new(),
            lead_time_model: BTreeMap::new(),
        }
    }

    fn pct(p: f64) -> ScenarioParameters {
        ScenarioParameters {
            percentage: Some(p),
            ..ScenarioParameters::default()
        }
    }

    /// One road shipment whose lines sum to 1000 kg.
    fn single_shipment_snapshot() -> LedgerSnapshot {
        let s = shipment("S1", "Mumbai", "Delhi", "road", "SUP_A", "2025-01-05");
        let lines = shipment_lines(&s, 600.0, 400.0).to_vec();
        LedgerSnapshot::new(lines, vec![s])
    }

    #[test]
    fn empty_scenario_reports_positive_zero() {
        let mut req = request("distance_reduction", pct(20.0));
        req.window = DateWindow::parse("2024-01-01", "2024-01-31").unwrap();
        let r = simulate(&single_shipment_snapshot(), &req).unwrap();
        assert_eq!(r.impacted_activity_count, 0);
        assert!(r.baseline_carbon_kg == 0.0 && r.baseline_carbon_kg.is_sign_positive());
        assert!(r.scenario_carbon_kg.is_sign_positive());
        assert!(r.delta_carbon_kg.is_sign_positive());
        assert!(r.baseline_cost.is_sign_positive());
    }

    #[test]
    fn inverted_request_window_fails_to_deserialize() {
        let body = json!({
            "window": { "from": "2025-02-01", "to": "2025-01-01" },
            "scenario_type": "distance_reduction",
            "parameters": { "percentage": 20.0 },
        });
        assert!(serde_json::from_value::<ScenarioRequest>(body).is_err());
    }

    #[test]
    fn distance_reduction_scales_baseline() {
        let r = simulate(&single_shipment_snapshot(), &request("distance_reduction", pct(20.0))).unwrap();
        assert_eq!(r.baseline_carbon_kg, 1000.0);
        assert_eq!(r.scenario_carbon_kg, 800.0);
        assert_eq!(r.delta_carbon_kg, -200.0);
        assert_eq!(r.delta_carbon_pct, -20.0);
        assert_eq!(r.impacted_activity_count, 1);
        assert_eq!(r.assumptions_used["distance_reduction_pct"], json!(0.2));
        assert_eq!(r.delta_cost, 0.0);
    }

    #[test]
    fn consolidation_applies_half_the_percentage() {
        let r = simulate(&single_shipment_snapshot(), &request("consolidation", pct(20.0))).unwrap();
        assert_eq!(r.scenario_carbon_kg, 900.0);
        assert_eq!(r.assumptions_used["consolidation_effective_pct"], json!(0.1));
    }

    #[test]
    fn mode_shift_rescales_transport_of_first_shipments_and_updates_proxies() {
        let mut shipments = Vec::new();
        let mut lines = Vec::new();
        for id in ["S3", "S1", "S2", "S4"] {
            let s = shipment(id, "Mumbai", "Delhi", "road", "SUP_A", "2025-01-05");
            lines.extend(shipment_lines(&s, 120.0, 10.0));
            shipments.push(s);
        }
        let snap = LedgerSnapshot::new(lines, shipments);

        let mut req = request(
            "mode_shift",
            ScenarioParameters {
                from_mode: Some("road".to_string()),
                to_mode: Some("rail".to_string()),
                percentage: Some(50.0),
                ..ScenarioParameters::default()
            },
        );
        req.cost_model.insert("road_cost_per_tkm".to_string(), 2.0);
        req.cost_model.insert("rail_cost_per_tkm".to_string(), 1.0);
        req.lead_time_model.insert("road_days".to_string(), 2.0);
        req.lead_time_model.insert("rail_days".to_string(), 4.0);

        let r = simulate(&snap, &req).unwrap();
        assert_eq!(r.impacted_activity_count, 2);
        assert_eq!(r.baseline_carbon_kg, 520.0);
        // Two shipments: 120 kg transport each, shifted at ratio 1/3.
        assert!((r.scenario_carbon_kg - (520.0 - 240.0 + 80.0)).abs() < 1e-9);
        // 4 × 200 tkm at 2.0 vs 2 × 200 at 2.0 + 2 × 200 at 1.0.
        assert_eq!(r.baseline_cost, 1600.0);
        assert_eq!(r.scenario_cost, 1200.0);
        assert_eq!(r.baseline_lead_time_days, 2.0);
        assert_eq!(r.scenario_lead_time_days, 3.0);
        assert!(r.assumptions_used["ef_ratio_used"].as_f64().unwrap() < 1.0);
    }

    #[test]
    fn supplier_reduction_scales_only_that_suppliers_goods() {
        let a = shipment("S1", "Mumbai", "Delhi", "road", "SUP_A", "2025-01-05");
        let b = shipment("S2", "Mumbai", "Delhi", "road", "SUP_B", "2025-01-06");
        let mut lines = shipment_lines(&a, 100.0, 200.0).to_vec();
        lines.extend(shipment_lines(&b, 100.0, 400.0));
        let snap = LedgerSnapshot::new(lines, vec![a, b]);

        let req = request(
            "supplier_intensity_reduction",
            ScenarioParameters {
                supplier_id: Some("SUP_B".to_string()),
                reduction_pct: Some(25.0),
                ..ScenarioParameters::default()
            },
        );
        let r = simulate(&snap, &req).unwrap();
        assert_eq!(r.baseline_carbon_kg, 800.0);
        assert_eq!(r.scenario_carbon_kg, 700.0);
        assert_eq!(r.impacted_activity_count, 1);
    }

    #[test]
    fn filters_restrict_the_baseline() {
        let a = shipment("S1", "Mumbai", "Delhi", "road", "SUP_A", "2025-01-05");
        let b = shipment("S2", "Pune", "Goa", "rail", "SUP_B", "2025-01-06");
        let mut lines = shipment_lines(&a, 100.0, 0.0).to_vec();
        lines.extend(shipment_lines(&b, 50.0, 0.0));
        let snap = LedgerSnapshot::new(lines, vec![a, b]);

        let mut req = request("distance_reduction", pct(10.0));
        req.filters.lane_ids = vec!["LANE_PUN_GOA_rail".to_string()];
        let r = simulate(&snap, &req).unwrap();
        assert_eq!(r.baseline_carbon_kg, 50.0);
        assert_eq!(r.impacted_activity_count, 1);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let snap = single_shipment_snapshot();
        assert!(matches!(
            simulate(&snap, &request("teleport", pct(10.0))),
            Err(AnalyticsError::InvalidRequest(_))
        ));
        assert!(simulate(&snap, &request("mode_shift", pct(10.0))).is_err());
        assert!(simulate(&snap, &request("supplier_intensity_reduction", pct(10.0))).is_err());
        assert!(simulate(&snap, &request("distance_reduction", pct(120.0))).is_err());
        assert!(simulate(&snap, &request("consolidation", pct(-1.0))).is_err());
    }

    #[test]
    fn empty_match_is_zeroed() {
        let r = simulate(&LedgerSnapshot::default(), &request("consolidation", pct(50.0))).unwrap();
        assert_eq!(r.baseline_carbon_kg, 0.0);
        assert_eq!(r.delta_carbon_pct, 0.0);
        assert_eq!(r.baseline_lead_time_days, 0.0);
    }
}
