//! Resolved latest-state snapshots.
//!
//! One snapshot per entity key, built from the winning feed row. These are what
//! the compiler reads and what the store persists as entity tables.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_events::{ElectricityBillRecord, ShipmentRecord, SupplierRecord};

use crate::lane::lane_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentState {
    pub shipment_id: String,
    pub event_time: DateTime<Utc>,
    pub period_date: NaiveDate,
    pub origin_city: String,
    pub origin_state: String,
    pub destination_city: String,
    pub destination_state: String,
    pub mode: String,
    pub lane_id: String,
    pub distance_km: Option<f64>,
    pub weight_tons: Option<f64>,
    pub sku: Option<String>,
    pub quantity: Option<f64>,
    pub supplier_id: Option<String>,
    pub facility_id: Option<String>,
    pub urgent_flag: bool,
}

impl ShipmentState {
    pub fn from_record(record: &ShipmentRecord, event_time: DateTime<Utc>) -> Self {
        Self {
            shipment_id: record.shipment_id.clone(),
            event_time,
            period_date: record.period_date,
            origin_city: record.origin_city.clone(),
            origin_state: record.origin_state.clone(),
            destination_city: record.destination_city.clone(),
            destination_state: record.destination_state.clone(),
            mode: record.mode.trim().to_string(),
            lane_id: lane_id(&record.origin_city, &record.destination_city, &record.mode),
            distance_km: record.distance_km,
            weight_tons: record.weight_tons,
            sku: non_empty(&record.sku),
            quantity: record.quantity,
            supplier_id: non_empty(&record.supplier_id),
            facility_id: non_empty(&record.facility_id),
            urgent_flag: record.urgent_flag.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierState {
    pub supplier_id: String,
    pub supplier_name: String,
    pub region: String,
    pub state: String,
    pub emissions_intensity_kgco2e_per_unit: Option<f64>,
    pub intensity_version: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}

impl SupplierState {
    pub fn from_record(record: &SupplierRecord, event_time: DateTime<Utc>) -> Self {
        Self {
            supplier_id: record.supplier_id.clone(),
            supplier_name: record.supplier_name.clone(),
            region: record.region.clone(),
            state: record.state.clone(),
            emissions_intensity_kgco2e_per_unit: record.emissions_intensity_kgco2e_per_unit,
            intensity_version: non_empty(&record.intensity_version),
            last_updated_at: event_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricityBillState {
    pub bill_id: String,
    pub event_time: DateTime<Utc>,
    pub period_date: NaiveDate,
    pub facility_id: String,
    pub state: String,
    pub kwh: Option<f64>,
}

impl ElectricityBillState {
    pub fn from_record(record: &ElectricityBillRecord, event_time: DateTime<Utc>) -> Self {
        Self {
            bill_id: record.bill_id.clone(),
            event_time,
            period_date: record.period_date,
            facility_id: record.facility_id.clone(),
            state: record.state.clone(),
            kwh: record.kwh,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
