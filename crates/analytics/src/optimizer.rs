//! Rule-based recommendations over the top emitting lanes.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carbonledger_core::DateWindow;
use carbonledger_emissions::{ActivityType, Dimension};

use crate::error::AnalyticsError;
use crate::policy::{MODES, OptimizerPolicy};
use crate::reader::LedgerSnapshot;

fn default_max_cost_increase_pct() -> f64 {
    2.0
}

fn default_allowed_modes() -> Vec<String> {
    MODES.iter().map(|m| m.to_string()).collect()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConstraints {
    #[serde(default = "default_max_cost_increase_pct")]
    pub max_cost_increase_pct: f64,
    #[serde(default = "default_allowed_modes")]
    pub allowed_modes: Vec<String>,
    #[serde(default = "default_true")]
    pub avoid_air_unless_urgent: bool,
    #[serde(default = "default_true")]
    pub sla_strict: bool,
}

impl Default for OptimizerConstraints {
    fn default() -> Self {
        Self {
            max_cost_increase_pct: default_max_cost_increase_pct(),
            allowed_modes: default_allowed_modes(),
            avoid_air_unless_urgent: true,
            sla_strict: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub window: DateWindow,
    /// Caller weights, echoed back; the rules do not use them yet.
    #[serde(default)]
    pub weights: JsonValue,
    #[serde(default)]
    pub constraints: OptimizerConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedLane {
    pub lane_id: String,
    pub shipment_count: usize,
    pub suggested_mode: Option<String>,
}

/// Constraint inputs a recommendation was evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintCompliance {
    pub max_cost_increase_pct: f64,
    pub allowed_modes: Vec<String>,
    pub sla_strict: bool,
    pub avoid_air_unless_urgent: bool,
    pub cost_scaled: bool,
    pub compliant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub rationale: String,
    pub estimated_carbon_savings_kg: f64,
    pub cost_impact: f64,
    pub lead_time_impact_days: f64,
    pub confidence: f64,
    pub affected: AffectedLane,
    pub constraint_compliance: ConstraintCompliance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub estimated_total_savings_kg: f64,
    pub recommendation_count: usize,
    pub weights_used: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub summary: OptimizationSummary,
    pub recommendations: Vec<Recommendation>,
    pub assumptions_used: Vec<String>,
}

/// Savings and cost impact after applying the cost ceiling.
///
/// `cost_impact` is fractional (0.03 = +3%), `max_cost_increase_pct` is a
/// percentage. When the ceiling binds, both values shrink by the same factor.
pub fn cap_cost_impact(savings_kg: f64, cost_impact: f64, max_cost_increase_pct: f64) -> (f64, f64, bool) {
    let proposed_pct = cost_impact * 100.0;
    if proposed_pct > max_cost_increase_pct {
        let scale = max_cost_increase_pct / proposed_pct;
        (savings_kg * scale, max_cost_increase_pct / 100.0, true)
    } else {
        (savings_kg, cost_impact, false)
    }
}

pub fn optimize(
    snapshot: &LedgerSnapshot,
    req: &OptimizeRequest,
    policy: &OptimizerPolicy,
) -> Result<OptimizationResult, AnalyticsError> {
    let c = &req.constraints;
    if !(c.max_cost_increase_pct.is_finite() && c.max_cost_increase_pct >= 0.0) {
        return Err(AnalyticsError::invalid(format!(
            "max_cost_increase_pct must be a non-negative number (got {})",
            c.max_cost_increase_pct
        )));
    }
    if let Some(unknown) = c
        .allowed_modes
        .iter()
        .find(|m| !MODES.iter().any(|known| known.eq_ignore_ascii_case(m)))
    {
        return Err(AnalyticsError::invalid(format!("unknown mode '{unknown}' in allowed_modes")));
    }

    let mut lanes: HashMap<&str, (f64, usize)> = HashMap::new();
    for line in snapshot
        .lines_in(&req.window)
        .filter(|l| l.activity_type == ActivityType::Shipment)
    {
        if let Some(lane) = line.dimension_key(Dimension::Lane) {
            let e = lanes.entry(lane).or_default();
            e.0 += line.kg_co2e;
            e.1 += 1;
        }
    }
    let mut ranked: Vec<(&str, (f64, usize))> = lanes.into_iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| b.0.total_cmp(&a.0).then_with(|| ka.cmp(kb)));
    ranked.truncate(policy.top_lanes);

    let shift_allowed = c
        .allowed_modes
        .iter()
        .any(|m| m.eq_ignore_ascii_case(&policy.shift_mode))
        && !c.sla_strict;

    let mut recommendations = Vec::with_capacity(ranked.len());
    let mut total_savings = 0.0;

    for (lane_id, (kg, count)) in ranked {
        let (title, suggested_mode, savings_pct, cost_impact, lead_time, confidence, reason) =
            if shift_allowed {
                (
                    format!("Shift road to {} on hotspot lane", policy.shift_mode),
                    Some(policy.shift_mode.clone()),
                    policy.shift_savings_pct,
                    policy.shift_cost_impact,
                    policy.shift_lead_time_days,
                    policy.shift_confidence,
                    format!(
                        "{} has lower kgCO2e/ton-km than road for long-haul.",
                        capitalize(&policy.shift_mode)
                    ),
                )
            } else {
                (
                    "Improve routing & load efficiency on hotspot lane".to_string(),
                    None,
                    policy.improve_savings_pct,
                    policy.improve_cost_impact,
                    policy.improve_lead_time_days,
                    policy.improve_confidence,
                    "Route optimization and consolidation reduce ton-km driven.".to_string(),
                )
            };

        let (savings, cost_impact, cost_scaled) =
            cap_cost_impact(kg * savings_pct, cost_impact, c.max_cost_increase_pct);
        total_savings += savings;

        recommendations.push(Recommendation {
            title,
            rationale: format!("Lane `{lane_id}` is a top emissions contributor. {reason}"),
            estimated_carbon_savings_kg: savings,
            cost_impact,
            lead_time_impact_days: lead_time,
            confidence,
            affected: AffectedLane {
                lane_id: lane_id.to_string(),
                shipment_count: count,
                suggested_mode,
            },
            constraint_compliance: ConstraintCompliance {
                max_cost_increase_pct: c.max_cost_increase_pct,
                allowed_modes: c.allowed_modes.clone(),
                sla_strict: c.sla_strict,
                avoid_air_unless_urgent: c.avoid_air_unless_urgent,
                cost_scaled,
                compliant: cost_impact * 100.0 <= c.max_cost_increase_pct + 1e-9,
            },
        });
    }

    Ok(OptimizationResult {
        summary: OptimizationSummary {
            period_from: req.window.from(),
            period_to: req.window.to(),
            estimated_total_savings_kg: total_savings,
            recommendation_count: recommendations.len(),
            weights_used: req.weights.clone(),
        },
        recommendations,
        assumptions_used: vec![
            "Savings estimates are conservative rule-based transforms over lane hotspot aggregates.".to_string(),
            "Mode shift is only proposed when the target mode is allowed and the SLA is not strict.".to_string(),
            "Air avoidance uses SLA strictness as the urgency signal; no mode shift ever proposes air.".to_string(),
        ],
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    fn snapshot() -> LedgerSnapshot {
        let mut lines = Vec::new();
        let mut shipments = Vec::new();
        for (i, (o, d, kg)) in [("Mumbai", "Delhi", 1000.0), ("Pune", "Goa", 500.0), ("Agra", "Kota", 10.0)]
            .into_iter()
            .enumerate()
        {
            let s = shipment(&format!("S{i}"), o, d, "road", "SUP_A", "2025-01-05");
            lines.extend(shipment_lines(&s, kg, 9_999.0));
            shipments.push(s);
        }
        LedgerSnapshot::new(lines, shipments)
    }

    fn request(constraints: OptimizerConstraints) -> OptimizeRequest {
        OptimizeRequest {
            window: DateWindow::parse("2025-01-01", "2025-01-31").unwrap(),
            weights: JsonValue::Null,
            constraints,
        }
    }

    #[test]
    fn strict_sla_yields_routing_improvements() {
        let r = optimize(&snapshot(), &request(OptimizerConstraints::default()), &OptimizerPolicy::default()).unwrap();
        assert_eq!(r.recommendations.len(), 3);
        let top = &r.recommendations[0];
        assert_eq!(top.affected.lane_id, "LANE_MUM_DEL_road");
        assert_eq!(top.affected.suggested_mode, None);
        assert!((top.estimated_carbon_savings_kg - 80.0).abs() < 1e-9);
        assert_eq!(top.cost_impact, 0.01);
        assert_eq!(top.confidence, 0.55);
        assert!(top.constraint_compliance.compliant);
        assert!((r.summary.estimated_total_savings_kg - 1510.0 * 0.08).abs() < 1e-9);
    }

    #[test]
    fn relaxed_sla_with_rail_allowed_proposes_shift() {
        let constraints = OptimizerConstraints {
            sla_strict: false,
            ..OptimizerConstraints::default()
        };
        let r = optimize(&snapshot(), &request(constraints), &OptimizerPolicy::default()).unwrap();
        let top = &r.recommendations[0];
        assert_eq!(top.affected.suggested_mode.as_deref(), Some("rail"));
        assert!((top.estimated_carbon_savings_kg - 200.0).abs() < 1e-9);
        assert_eq!(top.cost_impact, -0.02);
        assert_eq!(top.lead_time_impact_days, 1.0);
        assert_eq!(top.confidence, 0.65);

        let no_rail = OptimizerConstraints {
            sla_strict: false,
            allowed_modes: vec!["road".to_string()],
            ..OptimizerConstraints::default()
        };
        let r = optimize(&snapshot(), &request(no_rail), &OptimizerPolicy::default()).unwrap();
        assert_eq!(r.recommendations[0].affected.suggested_mode, None);
    }

    #[test]
    fn cost_ceiling_scales_savings_and_cost_together() {
        let (savings, cost, scaled) = cap_cost_impact(90.0, 0.03, 2.0);
        assert!(scaled);
        assert_eq!(cost, 0.02);
        assert!((savings - 60.0).abs() < 1e-9);

        let policy = OptimizerPolicy {
            improve_cost_impact: 0.03,
            ..OptimizerPolicy::default()
        };
        let r = optimize(&snapshot(), &request(OptimizerConstraints::default()), &policy).unwrap();
        let top = &r.recommendations[0];
        assert_eq!(top.cost_impact, 0.02);
        assert!((top.estimated_carbon_savings_kg - 80.0 * 2.0 / 3.0).abs() < 1e-9);
        assert!(top.constraint_compliance.cost_scaled);
        assert!(top.constraint_compliance.compliant);
    }

    #[test]
    fn invalid_constraints_are_rejected() {
        let bad = OptimizerConstraints {
            max_cost_increase_pct: -1.0,
            ..OptimizerConstraints::default()
        };
        assert!(optimize(&snapshot(), &request(bad), &OptimizerPolicy::default()).is_err());

        let bad = OptimizerConstraints {
            allowed_modes: vec!["hyperloop".to_string()],
            ..OptimizerConstraints::default()
        };
        assert!(optimize(&snapshot(), &request(bad), &OptimizerPolicy::default()).is_err());
    }

    #[test]
    fn top_lane_limit_and_empty_window() {
        let policy = OptimizerPolicy {
            top_lanes: 2,
            ..OptimizerPolicy::default()
        };
        let r = optimize(&snapshot(), &request(OptimizerConstraints::default()), &policy).unwrap();
        assert_eq!(r.recommendations.len(), 2);

        let r = optimize(&LedgerSnapshot::default(), &request(OptimizerConstraints::default()), &policy).unwrap();
        assert!(r.recommendations.is_empty());
        assert_eq!(r.summary.estimated_total_savings_kg, 0.0);
    }
}
