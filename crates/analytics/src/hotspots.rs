//! Hotspot ranking.
//!
//! Lines are grouped by one dimension key, ranked by emissions, and annotated
//! with their share of the window total and a short-term trend.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_core::DateWindow;
use carbonledger_emissions::{Dimension, LedgerLine};

use crate::error::AnalyticsError;
use crate::policy::TREND_WINDOW_DAYS;
use crate::reader::LedgerSnapshot;

pub const DEFAULT_HOTSPOT_LIMIT: usize = 20;
pub const MAX_HOTSPOT_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub hotspot_id: String,
    pub dimension: Dimension,
    pub key: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub kg_co2e_total: f64,
    pub activity_count: usize,
    pub contribution_pct: f64,
    pub trend_delta_pct: f64,
    pub explanation: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotExplanation {
    pub hotspot_id: String,
    pub dimension: Dimension,
    pub key: String,
    pub kg_co2e_total: f64,
    pub activity_count: usize,
    pub contribution_pct: f64,
    pub explanation: String,
}

pub fn hotspot_id(dimension: Dimension, key: &str) -> String {
    format!("{dimension}:{key}")
}

/// Split `dimension:key`. The key may itself contain `:`.
pub fn parse_hotspot_id(id: &str) -> Result<(Dimension, String), AnalyticsError> {
    let (dimension, key) = id
        .split_once(':')
        .ok_or_else(|| AnalyticsError::invalid(format!("malformed hotspot id '{id}'")))?;
    let dimension: Dimension = dimension.parse()?;
    if key.trim().is_empty() {
        return Err(AnalyticsError::invalid(format!("hotspot id '{id}' has an empty key")));
    }
    Ok((dimension, key.to_string()))
}

pub fn check_hotspot_limit(limit: Option<usize>) -> Result<usize, AnalyticsError> {
    let limit = limit.unwrap_or(DEFAULT_HOTSPOT_LIMIT);
    if !(1..=MAX_HOTSPOT_LIMIT).contains(&limit) {
        return Err(AnalyticsError::invalid(format!(
            "limit must be between 1 and {MAX_HOTSPOT_LIMIT} (got {limit})"
        )));
    }
    Ok(limit)
}

/// Percentage change from `previous` to `recent`.
///
/// A zero previous window reads as +100% when anything appeared, 0% otherwise.
pub fn trend_delta_pct(recent: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (recent - previous) / previous * 100.0
    } else if recent > 0.0 {
        100.0
    } else {
        0.0
    }
}

pub fn explanation(dimension: Dimension, contribution_pct: f64) -> String {
    let base = format!(
        "This hotspot ranks high because it contributes {contribution_pct:.1}% of total emissions in the selected period."
    );
    let note = match dimension {
        Dimension::Lane => {
            "Lanes are driven by distance × weight × mode factor; long-distance heavy routes on road or air dominate."
        }
        Dimension::Supplier => {
            "Supplier hotspots reflect purchased-goods intensity and the shipments associated with that supplier."
        }
        Dimension::Sku => {
            "SKU hotspots indicate repeated movements or higher weights and distances for that SKU."
        }
        Dimension::Facility => {
            "Facility hotspots are driven by electricity usage (Scope 2) and the local grid factor."
        }
    };
    format!("{base} {note}")
}

#[derive(Debug, Default, Clone, Copy)]
struct Group {
    kg: f64,
    count: usize,
}

fn group_by<'a>(
    lines: impl Iterator<Item = &'a LedgerLine>,
    dimension: Dimension,
) -> (HashMap<&'a str, Group>, f64) {
    let mut groups: HashMap<&str, Group> = HashMap::new();
    let mut total = 0.0;
    for line in lines {
        total += line.kg_co2e;
        if let Some(key) = line.dimension_key(dimension) {
            let g = groups.entry(key).or_default();
            g.kg += line.kg_co2e;
            g.count += 1;
        }
    }
    (groups, total)
}

fn contribution(kg: f64, total: f64) -> f64 {
    if total > 0.0 { kg / total * 100.0 } else { 0.0 }
}

fn key_sum(snapshot: &LedgerSnapshot, window: Option<DateWindow>, dimension: Dimension, key: &str) -> f64 {
    match window {
        Some(w) => snapshot
            .lines_in(&w)
            .filter(|l| l.dimension_key(dimension) == Some(key))
            .fold(0.0, |acc, l| acc + l.kg_co2e),
        None => 0.0,
    }
}

/// Rank dimension keys in `window` by emissions, largest first.
pub fn rank_hotspots(
    snapshot: &LedgerSnapshot,
    dimension: Dimension,
    window: &DateWindow,
    limit: usize,
    computed_at: DateTime<Utc>,
) -> Vec<Hotspot> {
    let (groups, total) = group_by(snapshot.lines_in(window), dimension);

    let mut ranked: Vec<(&str, Group)> = groups.into_iter().collect();
    ranked.sort_by(|(ka, a), (kb, b)| b.kg.total_cmp(&a.kg).then_with(|| ka.cmp(kb)));
    ranked.truncate(limit);

    let recent = window.trailing(TREND_WINDOW_DAYS);
    let previous = recent.preceding(TREND_WINDOW_DAYS, window.from());

    ranked
        .into_iter()
        .map(|(key, g)| {
            let contribution_pct = contribution(g.kg, total);
            let recent_kg = key_sum(snapshot, Some(recent), dimension, key);
            let previous_kg = key_sum(snapshot, previous, dimension, key);
            Hotspot {
                hotspot_id: hotspot_id(dimension, key),
                dimension,
                key: key.to_string(),
                period_from: window.from(),
                period_to: window.to(),
                kg_co2e_total: g.kg,
                activity_count: g.count,
                contribution_pct,
                trend_delta_pct: trend_delta_pct(recent_kg, previous_kg),
                explanation: explanation(dimension, contribution_pct),
                computed_at,
            }
        })
        .collect()
}

/// Explain one hotspot against the whole ledger.
pub fn explain_hotspot(snapshot: &LedgerSnapshot, id: &str) -> Result<HotspotExplanation, AnalyticsError> {
    let (dimension, key) = parse_hotspot_id(id)?;
    let (groups, total) = group_by(snapshot.lines().iter(), dimension);
    let g = groups
        .get(key.as_str())
        .copied()
        .ok_or_else(|| AnalyticsError::NotFound(format!("hotspot {id}")))?;

    let contribution_pct = contribution(g.kg, total);
    Ok(HotspotExplanation {
        hotspot_id: hotspot_id(dimension, &key),
        dimension,
        key,
        kg_co2e_total: g.kg,
        activity_count: g.count,
        contribution_pct,
        explanation: explanation(dimension, contribution_pct),
    })
}
