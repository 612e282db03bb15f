//! Window summaries and ledger listing.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_core::DateWindow;
use carbonledger_emissions::{Category, LedgerLine, Scope};

use crate::error::AnalyticsError;
use crate::reader::LedgerSnapshot;

pub const DEFAULT_LEDGER_LIMIT: usize = 200;
pub const MAX_LEDGER_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub kg_co2e: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub activity_count: usize,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub last_computed_at: Option<DateTime<Utc>>,
}

/// Emissions summary for a window.
///
/// `scope_split` is keyed by `"1"`/`"2"`/`"3"`, `category_split` by category
/// name. Only scopes and categories present in the window appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSummary {
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub total_kg_co2e: f64,
    pub scope_split: BTreeMap<String, f64>,
    pub category_split: BTreeMap<String, f64>,
    pub trend_daily: Vec<DailyPoint>,
    pub coverage: Coverage,
    pub freshness: Freshness,
}

pub fn summarize(snapshot: &LedgerSnapshot, window: &DateWindow) -> CarbonSummary {
    let mut total = 0.0;
    let mut scope_split: BTreeMap<String, f64> = BTreeMap::new();
    let mut category_split: BTreeMap<String, f64> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut count = 0usize;
    let mut confidence_sum = 0.0;
    let mut last_computed_at: Option<DateTime<Utc>> = None;

    for line in snapshot.lines_in(window) {
        total += line.kg_co2e;
        *scope_split.entry(line.scope.to_string()).or_default() += line.kg_co2e;
        *category_split.entry(line.category.to_string()).or_default() += line.kg_co2e;
        *daily.entry(line.period_date).or_default() += line.kg_co2e;
        count += 1;
        confidence_sum += line.confidence;
        last_computed_at = last_computed_at.max(Some(line.computed_at));
    }

    CarbonSummary {
        period_from: window.from(),
        period_to: window.to(),
        total_kg_co2e: total,
        scope_split,
        category_split,
        trend_daily: daily
            .into_iter()
            .map(|(date, kg_co2e)| DailyPoint { date, kg_co2e })
            .collect(),
        coverage: Coverage {
            activity_count: count,
            avg_confidence: if count == 0 { 0.0 } else { confidence_sum / count as f64 },
        },
        freshness: Freshness { last_computed_at },
    }
}

/// Validated ledger listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerQuery {
    window: DateWindow,
    scope: Option<Scope>,
    category: Option<Category>,
    limit: usize,
    offset: usize,
}

impl LedgerQuery {
    pub fn new(
        window: DateWindow,
        scope: Option<Scope>,
        category: Option<Category>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Self, AnalyticsError> {
        let limit = limit.unwrap_or(DEFAULT_LEDGER_LIMIT);
        if !(1..=MAX_LEDGER_LIMIT).contains(&limit) {
            return Err(AnalyticsError::invalid(format!(
                "limit must be between 1 and {MAX_LEDGER_LIMIT} (got {limit})"
            )));
        }
        Ok(Self {
            window,
            scope,
            category,
            limit,
            offset: offset.unwrap_or(0),
        })
    }

    pub fn window(&self) -> &DateWindow {
        &self.window
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub total: usize,
    pub items: Vec<LedgerLine>,
    pub limit: usize,
    pub offset: usize,
}

/// Page of lines, newest `computed_at` first (ties by ledger id).
pub fn list_ledger(snapshot: &LedgerSnapshot, query: &LedgerQuery) -> LedgerPage {
    let mut matched: Vec<&LedgerLine> = snapshot
        .lines_in(&query.window)
        .filter(|l| query.scope.is_none_or(|s| l.scope == s))
        .filter(|l| query.category.is_none_or(|c| l.category == c))
        .collect();

    matched.sort_by(|a, b| {
        b.computed_at
            .cmp(&a.computed_at)
            .then_with(|| a.ledger_id.cmp(&b.ledger_id))
    });

    LedgerPage {
        total: matched.len(),
        items: matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect(),
        limit: query.limit,
        offset: query.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use carbonledger_emissions::ActivityType;
    use proptest::prelude::*;

    fn window(from: &str, to: &str) -> DateWindow {
        DateWindow::parse(from, to).unwrap()
    }

    #[test]
    fn summary_splits_and_trend() {
        let s1 = shipment("S1", "Mumbai", "Delhi", "road", "SUP_A", "2025-01-02");
        let s2 = shipment("S2", "Pune", "Goa", "rail", "SUP_B", "2025-01-01");
        let mut lines = Vec::new();
        lines.extend(shipment_lines(&s1, 600.0, 250.0));
        lines.extend(shipment_lines(&s2, 40.0, 10.0));
        lines.push(bill_line("B1", "FAC_1", 700.0, "2025-01-02"));
        lines.push(bill_line("B2", "FAC_1", 999.0, "2025-03-01"));
        let snap = LedgerSnapshot::new(lines, vec![]);

        let s = summarize(&snap, &window("2025-01-01", "2025-01-31"));
        assert_eq!(s.total_kg_co2e, 1600.0);
        assert_eq!(s.scope_split["3"], 900.0);
        assert_eq!(s.scope_split["2"], 700.0);
        assert!(!s.scope_split.contains_key("1"));
        assert_eq!(s.category_split["transport"], 640.0);
        assert_eq!(s.trend_daily.len(), 2);
        assert_eq!(s.trend_daily[0].date, date("2025-01-01"));
        assert_eq!(s.trend_daily[1].kg_co2e, 1550.0);
        assert_eq!(s.coverage.activity_count, 5);
        assert!(s.freshness.last_computed_at.is_some());
    }

    #[test]
    fn empty_window_is_zeroed_not_an_error() {
        let snap = LedgerSnapshot::new(vec![bill_line("B1", "F", 5.0, "2025-01-02")], vec![]);
        let s = summarize(&snap, &window("2024-01-01", "2024-01-31"));
        assert_eq!(s.total_kg_co2e, 0.0);
        assert!(s.scope_split.is_empty());
        assert!(s.trend_daily.is_empty());
        assert_eq!(s.coverage.activity_count, 0);
        assert_eq!(s.coverage.avg_confidence, 0.0);
        assert_eq!(s.freshness.last_computed_at, None);
    }

    #[test]
    fn listing_filters_orders_and_paginates() {
        let mut a = line(ActivityType::Shipment, "S1", Category::Transport, 1.0, "2025-01-01");
        a.computed_at = at("2025-02-03T00:00:00Z");
        let b = line(ActivityType::Shipment, "S2", Category::Transport, 2.0, "2025-01-01");
        let c = line(ActivityType::Shipment, "S0", Category::Transport, 3.0, "2025-01-01");
        let d = bill_line("B1", "F", 4.0, "2025-01-01");
        let snap = LedgerSnapshot::new(vec![b, d, c, a], vec![]);

        let q = LedgerQuery::new(
            window("2025-01-01", "2025-01-31"),
            Some(Scope::Scope3),
            Some(Category::Transport),
            Some(2),
            None,
        )
        .unwrap();
        let page = list_ledger(&snap, &q);
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.items.iter().map(|l| l.ledger_id.as_str()).collect();
        assert_eq!(ids, ["shipment:S1:transport", "shipment:S0:transport"]);

        let q = LedgerQuery::new(window("2025-01-01", "2025-01-31"), None, None, Some(2), Some(2)).unwrap();
        let page = list_ledger(&snap, &q);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.offset, 2);
    }

    #[test]
    fn listing_limit_is_bounded() {
        let w = window("2025-01-01", "2025-01-31");
        assert!(LedgerQuery::new(w, None, None, Some(0), None).is_err());
        assert!(LedgerQuery::new(w, None, None, Some(1001), None).is_err());
        assert_eq!(LedgerQuery::new(w, None, None, None, None).unwrap().limit, 200);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: total == sum of scope split == sum of category split.
        #[test]
        fn summary_is_additive(
            kgs in proptest::collection::vec((0.0f64..10_000.0, 0usize..3, 1u32..28), 0..40),
        ) {
            let lines: Vec<LedgerLine> = kgs
                .iter()
                .enumerate()
                .map(|(i, (kg, kind, day))| {
                    let period = format!("2025-01-{day:02}");
                    match kind {
                        0 => line(ActivityType::Shipment, &format!("S{i}"), Category::Transport, *kg, &period),
                        1 => line(ActivityType::PurchasedGoods, &format!("S{i}"), Category::PurchasedGoods, *kg, &period),
                        _ => bill_line(&format!("B{i}"), "F", *kg, &period),
                    }
                })
                .collect();
            let snap = LedgerSnapshot::new(lines, vec![]);
            let s = summarize(&snap, &window("2025-01-01", "2025-01-31"));

            let eps = 1e-9 * s.total_kg_co2e.max(1.0);
            let by_scope: f64 = s.scope_split.values().sum();
            let by_category: f64 = s.category_split.values().sum();
            let by_day: f64 = s.trend_daily.iter().map(|p| p.kg_co2e).sum();
            prop_assert!((s.total_kg_co2e - by_scope).abs() <= eps);
            prop_assert!((s.total_kg_co2e - by_category).abs() <= eps);
            prop_assert!((s.total_kg_co2e - by_day).abs() <= eps);
        }
    }
}
