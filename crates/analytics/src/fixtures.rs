//! Ledger builders shared by the analytics tests.

use chrono::{DateTime, NaiveDate, Utc};

use carbonledger_core::{parse_date, parse_event_time};
use carbonledger_emissions::{
    ActivityType, Assumptions, Category, LedgerLine, LedgerLineId, Lineage, Method, Scope,
    ShipmentState, lane_id,
};

pub fn date(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

pub fn at(s: &str) -> DateTime<Utc> {
    parse_event_time(s).unwrap()
}

pub fn line(
    activity_type: ActivityType,
    activity_id: &str,
    category: Category,
    kg: f64,
    period: &str,
) -> LedgerLine {
    let scope = if category == Category::Electricity { Scope::Scope2 } else { Scope::Scope3 };
    LedgerLine {
        ledger_id: LedgerLineId::compose(activity_type, activity_id, category),
        activity_id: activity_id.to_string(),
        activity_type,
        scope,
        category,
        kg_co2e: kg,
        method: Method::ActivityFactor,
        confidence: 0.8,
        factor_ref: None,
        lineage: Lineage::default(),
        assumptions: Assumptions::default(),
        computed_at: at("2025-02-01T00:00:00Z"),
        period_date: date(period),
        supplier_id: None,
        lane_id: None,
        sku: None,
        facility_id: None,
    }
}

/// Transport + purchased-goods lines for one shipment.
pub fn shipment_lines(
    shipment: &ShipmentState,
    transport_kg: f64,
    goods_kg: f64,
) -> [LedgerLine; 2] {
    let mut transport = line(
        ActivityType::Shipment,
        &shipment.shipment_id,
        Category::Transport,
        transport_kg,
        &shipment.period_date.to_string(),
    );
    transport.lane_id = Some(shipment.lane_id.clone());
    transport.supplier_id = shipment.supplier_id.clone();
    transport.sku = shipment.sku.clone();

    let mut goods = transport.clone();
    goods.activity_type = ActivityType::PurchasedGoods;
    goods.category = Category::PurchasedGoods;
    goods.ledger_id = LedgerLineId::compose(
        ActivityType::PurchasedGoods,
        &shipment.shipment_id,
        Category::PurchasedGoods,
    );
    goods.kg_co2e = goods_kg;
    goods.method = Method::SupplierIntensity;
    goods.confidence = 0.75;

    [transport, goods]
}

pub fn bill_line(bill_id: &str, facility: &str, kg: f64, period: &str) -> LedgerLine {
    let mut l = line(ActivityType::ElectricityBill, bill_id, Category::Electricity, kg, period);
    l.facility_id = Some(facility.to_string());
    l
}

pub fn shipment(
    id: &str,
    origin: &str,
    destination: &str,
    mode: &str,
    supplier: &str,
    period: &str,
) -> ShipmentState {
    ShipmentState {
        shipment_id: id.to_string(),
        event_time: at(&format!("{period}T08:00:00Z")),
        period_date: date(period),
        origin_city: origin.to_string(),
        origin_state: String::new(),
        destination_city: destination.to_string(),
        destination_state: String::new(),
        mode: mode.to_string(),
        lane_id: lane_id(origin, destination, mode),
        distance_km: Some(100.0),
        weight_tons: Some(2.0),
        sku: Some(format!("SKU_{id}")),
        quantity: Some(10.0),
        supplier_id: Some(supplier.to_string()),
        facility_id: None,
        urgent_flag: false,
    }
}
