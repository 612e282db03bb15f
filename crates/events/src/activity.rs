//! Activity feed rows.
//!
//! One record type per feed. Optional fields model data-quality gaps: a row may
//! omit a distance, a quantity or an intensity and still be a valid event.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Entity type an event (and its resolved latest state) belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Shipment,
    Supplier,
    ElectricityBill,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Shipment,
        EntityKind::Supplier,
        EntityKind::ElectricityBill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Shipment => "shipment",
            EntityKind::Supplier => "supplier",
            EntityKind::ElectricityBill => "electricity_bill",
        }
    }

    /// File name of the append-only feed carrying this entity type.
    pub fn feed_file(&self) -> &'static str {
        match self {
            EntityKind::Shipment => "shipments_stream.jsonl",
            EntityKind::Supplier => "suppliers_stream.jsonl",
            EntityKind::ElectricityBill => "electricity_bills_stream.jsonl",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipment feed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub shipment_id: String,
    pub event_time: String,
    pub period_date: NaiveDate,
    #[serde(default)]
    pub origin_city: String,
    #[serde(default)]
    pub origin_state: String,
    #[serde(default)]
    pub destination_city: String,
    #[serde(default)]
    pub destination_state: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub weight_tons: Option<f64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub facility_id: Option<String>,
    #[serde(default)]
    pub urgent_flag: Option<bool>,
}

/// Supplier feed row (intensity updates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub supplier_id: String,
    pub event_time: String,
    #[serde(default)]
    pub supplier_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub emissions_intensity_kgco2e_per_unit: Option<f64>,
    #[serde(default)]
    pub intensity_version: Option<String>,
}

/// Electricity bill feed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricityBillRecord {
    pub bill_id: String,
    pub event_time: String,
    pub period_date: NaiveDate,
    #[serde(default)]
    pub facility_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub kwh: Option<f64>,
}

/// Any activity feed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    Shipment(ShipmentRecord),
    Supplier(SupplierRecord),
    ElectricityBill(ElectricityBillRecord),
}

impl ActivityEvent {
    pub fn kind(&self) -> EntityKind {
        match self {
            ActivityEvent::Shipment(_) => EntityKind::Shipment,
            ActivityEvent::Supplier(_) => EntityKind::Supplier,
            ActivityEvent::ElectricityBill(_) => EntityKind::ElectricityBill,
        }
    }

    /// Decode one feed row (a JSON object without the `kind` tag).
    pub fn from_feed_row(kind: EntityKind, row: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Shipment => ActivityEvent::Shipment(serde_json::from_value(row)?),
            EntityKind::Supplier => ActivityEvent::Supplier(serde_json::from_value(row)?),
            EntityKind::ElectricityBill => {
                ActivityEvent::ElectricityBill(serde_json::from_value(row)?)
            }
        })
    }
}

impl Event for ActivityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ActivityEvent::Shipment(_) => "activity.shipment",
            ActivityEvent::Supplier(_) => "activity.supplier",
            ActivityEvent::ElectricityBill(_) => "activity.electricity_bill",
        }
    }

    fn entity_key(&self) -> &str {
        match self {
            ActivityEvent::Shipment(r) => &r.shipment_id,
            ActivityEvent::Supplier(r) => &r.supplier_id,
            ActivityEvent::ElectricityBill(r) => &r.bill_id,
        }
    }

    fn raw_event_time(&self) -> &str {
        match self {
            ActivityEvent::Shipment(r) => &r.event_time,
            ActivityEvent::Supplier(r) => &r.event_time,
            ActivityEvent::ElectricityBill(r) => &r.event_time,
        }
    }
}
