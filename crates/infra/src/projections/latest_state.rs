//! Latest-state resolver.
//!
//! Folds the three activity feeds into one current snapshot per entity key. The
//! fold is a keep-max reducer over `(event_time, canonical payload bytes)`, so it
//! is commutative and idempotent: duplicates, redelivery and arbitrary arrival
//! order all converge to the same state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use carbonledger_emissions::{ElectricityBillState, ShipmentState, SupplierState};
use carbonledger_events::{
    ActivityEnvelope, ActivityEvent, ElectricityBillRecord, EntityKind, Projection,
    ShipmentRecord, SupplierRecord,
};

/// Reference to one resolved entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// The winning row for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub event_time: DateTime<Utc>,
    pub record: T,
    canonical: Vec<u8>,
}

/// Keep-max register map.
///
/// A row replaces the current one only when its `(event_time, canonical bytes)`
/// pair is strictly greater. Equal pairs are duplicates and change nothing.
#[derive(Debug, Clone)]
pub struct KeepMax<T> {
    current: BTreeMap<String, Resolved<T>>,
}

impl<T> Default for KeepMax<T> {
    fn default() -> Self {
        Self {
            current: BTreeMap::new(),
        }
    }
}

impl<T> KeepMax<T>
where
    T: Serialize + Clone,
{
    /// Offer a row; returns `true` when it became the current value.
    pub fn offer(&mut self, key: &str, event_time: DateTime<Utc>, record: &T) -> bool {
        // Serializing a plain record cannot fail; an empty key just sorts lowest.
        let canonical = serde_json::to_vec(record).unwrap_or_default();

        if let Some(cur) = self.current.get(key) {
            if (cur.event_time, cur.canonical.as_slice()) >= (event_time, canonical.as_slice()) {
                return false;
            }
        }

        self.current.insert(
            key.to_string(),
            Resolved {
                event_time,
                record: record.clone(),
                canonical,
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<&Resolved<T>> {
        self.current.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.current.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Latest state of every shipment, supplier and electricity bill.
///
/// Besides the resolved state it tracks which keys changed since the last
/// [`take_dirty`](Self::take_dirty), and which shipments reference each
/// supplier (for recompute fan-out).
#[derive(Debug, Default)]
pub struct LatestStateProjection {
    shipments: KeepMax<ShipmentRecord>,
    suppliers: KeepMax<SupplierRecord>,
    bills: KeepMax<ElectricityBillRecord>,
    shipments_by_supplier: BTreeMap<String, BTreeSet<String>>,
    dirty: BTreeSet<EntityRef>,
}

impl LatestStateProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shipment(&self, shipment_id: &str) -> Option<ShipmentState> {
        self.shipments
            .get(shipment_id)
            .map(|r| ShipmentState::from_record(&r.record, r.event_time))
    }

    pub fn supplier(&self, supplier_id: &str) -> Option<SupplierState> {
        self.suppliers
            .get(supplier_id)
            .map(|r| SupplierState::from_record(&r.record, r.event_time))
    }

    pub fn bill(&self, bill_id: &str) -> Option<ElectricityBillState> {
        self.bills
            .get(bill_id)
            .map(|r| ElectricityBillState::from_record(&r.record, r.event_time))
    }

    /// Keys of every resolved shipment, ascending.
    pub fn shipment_ids(&self) -> Vec<String> {
        self.shipments.keys().map(str::to_string).collect()
    }

    /// Shipments whose current state references `supplier_id`.
    pub fn shipments_for_supplier(&self, supplier_id: &str) -> Vec<String> {
        self.shipments_by_supplier
            .get(supplier_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        self.shipments.len() + self.suppliers.len() + self.bills.len()
    }

    /// Drain the set of keys whose state changed.
    pub fn take_dirty(&mut self) -> BTreeSet<EntityRef> {
        std::mem::take(&mut self.dirty)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Put keys back for the next commit (e.g. after a failed write).
    pub fn requeue(&mut self, refs: impl IntoIterator<Item = EntityRef>) {
        self.dirty.extend(refs);
    }

    fn reindex_shipment(&mut self, shipment_id: &str, previous: Option<&str>, current: Option<&str>) {
        if previous == current {
            return;
        }
        if let Some(prev) = previous {
            if let Some(ids) = self.shipments_by_supplier.get_mut(prev) {
                ids.remove(shipment_id);
                if ids.is_empty() {
                    self.shipments_by_supplier.remove(prev);
                }
            }
        }
        if let Some(cur) = current {
            self.shipments_by_supplier
                .entry(cur.to_string())
                .or_default()
                .insert(shipment_id.to_string());
        }
    }
}

fn supplier_key(record: &ShipmentRecord) -> Option<String> {
    record
        .supplier_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Projection for LatestStateProjection {
    type Ev = ActivityEvent;

    fn apply(&mut self, envelope: &ActivityEnvelope) -> bool {
        let key = envelope.entity_key();
        let at = envelope.event_time();

        let changed = match envelope.payload() {
            ActivityEvent::Shipment(record) => {
                let previous = self.shipments.get(key).and_then(|r| supplier_key(&r.record));
                let changed = self.shipments.offer(key, at, record);
                if changed {
                    let current = supplier_key(record);
                    self.reindex_shipment(key, previous.as_deref(), current.as_deref());
                }
                changed
            }
            ActivityEvent::Supplier(record) => self.suppliers.offer(key, at, record),
            ActivityEvent::ElectricityBill(record) => self.bills.offer(key, at, record),
        };

        if changed {
            self.dirty.insert(EntityRef::new(envelope.entity_kind(), key));
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonledger_core::parse_date;
    use proptest::prelude::*;

    fn shipment_event(id: &str, event_time: &str, distance: f64, supplier: &str) -> ActivityEnvelope {
        let record = ShipmentRecord {
            shipment_id: id.to_string(),
            event_time: event_time.to_string(),
            period_date: parse_date("2025-01-10").unwrap(),
            origin_city: "Mumbai".to_string(),
            origin_state: "MH".to_string(),
            destination_city: "Delhi".to_string(),
            destination_state: "DL".to_string(),
            mode: "road".to_string(),
            distance_km: Some(distance),
            weight_tons: Some(2.0),
            sku: Some("SKU_1".to_string()),
            quantity: Some(10.0),
            supplier_id: Some(supplier.to_string()),
            facility_id: None,
            urgent_flag: None,
        };
        ActivityEnvelope::from_activity(ActivityEvent::Shipment(record), 0).unwrap()
    }

    fn supplier_event(id: &str, event_time: &str, intensity: f64) -> ActivityEnvelope {
        let record = SupplierRecord {
            supplier_id: id.to_string(),
            event_time: event_time.to_string(),
            supplier_name: "Acme".to_string(),
            region: "West".to_string(),
            state: "MH".to_string(),
            emissions_intensity_kgco2e_per_unit: Some(intensity),
            intensity_version: Some("v1".to_string()),
        };
        ActivityEnvelope::from_activity(ActivityEvent::Supplier(record), 0).unwrap()
    }

    #[test]
    fn later_event_wins_and_stale_event_is_ignored() {
        let mut p = LatestStateProjection::new();
        assert!(p.apply(&shipment_event("S1", "2025-01-10T10:00:00Z", 500.0, "SUP_A")));
        assert!(!p.apply(&shipment_event("S1", "2025-01-10T09:00:00Z", 900.0, "SUP_A")));
        assert_eq!(p.shipment("S1").unwrap().distance_km, Some(500.0));

        assert!(p.apply(&shipment_event("S1", "2025-01-10T11:00:00Z", 700.0, "SUP_A")));
        assert_eq!(p.shipment("S1").unwrap().distance_km, Some(700.0));
    }

    #[test]
    fn duplicate_event_is_a_no_op() {
        let mut p = LatestStateProjection::new();
        let ev = shipment_event("S1", "2025-01-10T10:00:00Z", 500.0, "SUP_A");
        assert!(p.apply(&ev));
        assert_eq!(p.take_dirty().len(), 1);

        assert!(!p.apply(&ev));
        assert!(!p.has_dirty());
    }

    #[test]
    fn equal_timestamps_resolve_by_payload_regardless_of_order() {
        let a = shipment_event("S1", "2025-01-10T10:00:00Z", 500.0, "SUP_A");
        let b = shipment_event("S1", "2025-01-10T10:00:00Z", 600.0, "SUP_A");

        let mut ab = LatestStateProjection::new();
        ab.apply(&a);
        ab.apply(&b);
        let mut ba = LatestStateProjection::new();
        ba.apply(&b);
        ba.apply(&a);

        assert_eq!(ab.shipment("S1"), ba.shipment("S1"));
    }

    #[test]
    fn dirty_keys_track_changes_and_can_be_requeued() {
        let mut p = LatestStateProjection::new();
        p.apply(&shipment_event("S1", "2025-01-10T10:00:00Z", 500.0, "SUP_A"));
        p.apply(&supplier_event("SUP_A", "2025-01-01T00:00:00Z", 3.0));

        let dirty = p.take_dirty();
        assert!(dirty.contains(&EntityRef::new(EntityKind::Shipment, "S1")));
        assert!(dirty.contains(&EntityRef::new(EntityKind::Supplier, "SUP_A")));
        assert!(!p.has_dirty());

        p.requeue(dirty);
        assert_eq!(p.take_dirty().len(), 2);
    }

    #[test]
    fn supplier_index_follows_the_current_shipment_state() {
        let mut p = LatestStateProjection::new();
        p.apply(&shipment_event("S1", "2025-01-10T10:00:00Z", 500.0, "SUP_A"));
        p.apply(&shipment_event("S2", "2025-01-10T10:00:00Z", 500.0, "SUP_A"));
        assert_eq!(p.shipments_for_supplier("SUP_A"), ["S1", "S2"]);

        p.apply(&shipment_event("S1", "2025-01-11T10:00:00Z", 500.0, "SUP_B"));
        assert_eq!(p.shipments_for_supplier("SUP_A"), ["S2"]);
        assert_eq!(p.shipments_for_supplier("SUP_B"), ["S1"]);
        assert!(p.shipments_for_supplier("SUP_C").is_empty());
    }

    fn arb_events() -> impl Strategy<Value = Vec<ActivityEnvelope>> {
        proptest::collection::vec((0usize..4, 0u32..6, 0u32..3, 0usize..2), 1..30).prop_map(|rows| {
            rows.into_iter()
                .map(|(key, hour, distance, supplier)| {
                    shipment_event(
                        &format!("S{key}"),
                        &format!("2025-01-10T{hour:02}:00:00Z"),
                        100.0 * f64::from(distance + 1),
                        ["SUP_A", "SUP_B"][supplier],
                    )
                })
                .collect()
        })
    }

    fn resolve(events: &[ActivityEnvelope]) -> LatestStateProjection {
        let mut p = LatestStateProjection::new();
        for e in events {
            p.apply(e);
        }
        p
    }

    fn states(p: &LatestStateProjection) -> Vec<ShipmentState> {
        p.shipment_ids().iter().filter_map(|id| p.shipment(id)).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any permutation of the same events resolves to the same state.
        #[test]
        fn resolution_is_order_independent(
            (events, shuffled) in arb_events().prop_flat_map(|v| {
                let shuffled = Just(v.clone()).prop_shuffle();
                (Just(v), shuffled)
            })
        ) {
            let a = resolve(&events);
            let b = resolve(&shuffled);
            prop_assert_eq!(states(&a), states(&b));
            for id in a.shipment_ids() {
                prop_assert_eq!(a.shipments_for_supplier("SUP_A").contains(&id), b.shipments_for_supplier("SUP_A").contains(&id));
            }
        }

        /// Property: replaying a prefix again changes nothing.
        #[test]
        fn redelivery_is_idempotent(events in arb_events(), cut in 0usize..30) {
            let mut p = resolve(&events);
            let before = states(&p);
            p.take_dirty();

            let cut = cut.min(events.len());
            for e in &events[..cut] {
                prop_assert!(!p.apply(e));
            }
            prop_assert_eq!(states(&p), before);
            prop_assert!(!p.has_dirty());
        }

        /// Property: the resolved event time of a key never moves backwards.
        #[test]
        fn resolved_time_is_monotonic(events in arb_events()) {
            let mut p = LatestStateProjection::new();
            let mut seen: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
            for e in &events {
                p.apply(e);
                let now = p.shipment(e.entity_key()).unwrap().event_time;
                if let Some(prev) = seen.get(e.entity_key()) {
                    prop_assert!(now >= *prev);
                }
                seen.insert(e.entity_key().to_string(), now);
            }
        }
    }
}
