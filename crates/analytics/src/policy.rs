//! Heuristic policy tables for scenarios and recommendations.
//!
//! These numbers are business policy, not reference data. They are kept apart
//! from the emission factor reference on purpose: the ledger is computed from
//! factors, what-if estimates are computed from these.

use serde::{Deserialize, Serialize};

/// Transport modes known to the heuristics.
pub const MODES: [&str; 4] = ["road", "rail", "sea", "air"];

/// Approximate transport emission factors (kgCO2e/ton-km) used for mode-shift ratios.
pub const MODE_SHIFT_FACTORS: [(&str, f64); 4] =
    [("road", 0.12), ("rail", 0.04), ("sea", 0.01), ("air", 0.60)];

/// Cost per ton-km when the cost model has neither a mode rate nor a default.
pub const DEFAULT_COST_PER_TKM: f64 = 1.0;
/// Lead time in days when the lead-time model has neither a mode entry nor a default.
pub const DEFAULT_LEAD_TIME_DAYS: f64 = 3.0;

/// Share of the requested percentage applied by `consolidation`.
pub const CONSOLIDATION_EFFECTIVENESS: f64 = 0.5;

/// Length of the recent and previous hotspot trend windows.
pub const TREND_WINDOW_DAYS: i64 = 7;

/// Number of entries in report annexure rankings.
pub const REPORT_TOP_N: usize = 5;

pub fn mode_factor(mode: &str) -> Option<f64> {
    MODE_SHIFT_FACTORS
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mode.trim()))
        .map(|(_, v)| *v)
}

/// Emission ratio for shifting `from` to `to`.
///
/// Unknown source mode gives 1.0 (no change); unknown target mode is treated as
/// the source mode.
pub fn mode_shift_ratio(from: &str, to: &str) -> f64 {
    match mode_factor(from) {
        Some(from_ef) if from_ef > 0.0 => mode_factor(to).unwrap_or(from_ef) / from_ef,
        _ => 1.0,
    }
}

/// Rule constants for the recommendation optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerPolicy {
    /// Number of top lanes considered.
    pub top_lanes: usize,
    pub shift_mode: String,
    pub shift_savings_pct: f64,
    pub improve_savings_pct: f64,
    /// Fractional cost change (0.01 = +1%).
    pub shift_cost_impact: f64,
    pub improve_cost_impact: f64,
    pub shift_lead_time_days: f64,
    pub improve_lead_time_days: f64,
    pub shift_confidence: f64,
    pub improve_confidence: f64,
}

impl Default for OptimizerPolicy {
    fn default() -> Self {
        Self {
            top_lanes: 5,
            shift_mode: "rail".to_string(),
            shift_savings_pct: 0.20,
            improve_savings_pct: 0.08,
            shift_cost_impact: -0.02,
            improve_cost_impact: 0.01,
            shift_lead_time_days: 1.0,
            improve_lead_time_days: 0.2,
            shift_confidence: 0.65,
            improve_confidence: 0.55,
        }
    }
}
