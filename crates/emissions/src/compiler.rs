//! Ledger compiler.
//!
//! Joins resolved activity state with the factor reference and emits ledger
//! lines. Every enrichment step returns an explicit [`Enrichment`]: either a
//! matched factor or a documented fallback. The compiler never does IO and takes
//! `computed_at` from the caller so the same inputs always compile to the same
//! lines.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use carbonledger_events::EntityKind;

use crate::factor::FactorTable;
use crate::ledger::{
    ActivityType, Assumptions, Category, FactorRef, LedgerLine, LedgerLineId, Lineage,
    LineageSource, Method, Scope,
};
use crate::state::{ElectricityBillState, ShipmentState, SupplierState};

/// Road factor used when a shipment has no matching transport factor (kgCO2e/ton-km).
pub const ROAD_FALLBACK_FACTOR: f64 = 0.12;
/// Proxy intensity used when the supplier has no intensity (kgCO2e/unit).
pub const PROXY_INTENSITY: f64 = 2.5;
/// Fixed grid factor for electricity (kgCO2e/kWh).
pub const GRID_FACTOR: f64 = 0.70;
pub const GRID_FACTOR_KEY: &str = "grid_india_avg_2025";
pub const GRID_FACTOR_VERSION: &str = "v1";

pub const TRANSPORT_MATCHED_CONFIDENCE: f64 = 0.85;
pub const TRANSPORT_FALLBACK_CONFIDENCE: f64 = 0.40;
pub const SUPPLIER_MATCHED_CONFIDENCE: f64 = 0.75;
pub const SUPPLIER_FALLBACK_CONFIDENCE: f64 = 0.30;
pub const ELECTRICITY_MATCHED_CONFIDENCE: f64 = 0.80;
pub const ELECTRICITY_FALLBACK_CONFIDENCE: f64 = 0.0;

/// Outcome of one enrichment step.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    Matched {
        factor: f64,
        factor_ref: Option<FactorRef>,
        confidence: f64,
    },
    Fallback {
        factor: f64,
        reason: String,
        confidence: f64,
    },
}

impl Enrichment {
    pub fn factor(&self) -> f64 {
        match self {
            Enrichment::Matched { factor, .. } | Enrichment::Fallback { factor, .. } => *factor,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Enrichment::Matched { confidence, .. } | Enrichment::Fallback { confidence, .. } => {
                *confidence
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Enrichment::Fallback { .. })
    }
}

/// Compiles resolved state into ledger lines against one factor snapshot.
#[derive(Debug, Clone)]
pub struct LedgerCompiler {
    factors: Arc<FactorTable>,
}

impl LedgerCompiler {
    pub fn new(factors: Arc<FactorTable>) -> Self {
        Self { factors }
    }

    pub fn factors(&self) -> &Arc<FactorTable> {
        &self.factors
    }

    /// Transport factor lookup for a shipment mode.
    pub fn enrich_transport(&self, shipment: &ShipmentState) -> Enrichment {
        let usable = shipment.distance_km.is_some() && shipment.weight_tons.is_some();
        match self.factors.transport_factor(&shipment.mode) {
            Some(f) if usable => Enrichment::Matched {
                factor: f.ef_value,
                factor_ref: Some(FactorRef {
                    factor_key: f.factor_key.clone(),
                    factor_version: f.factor_version.clone(),
                }),
                confidence: TRANSPORT_MATCHED_CONFIDENCE,
            },
            Some(_) => Enrichment::Fallback {
                factor: ROAD_FALLBACK_FACTOR,
                reason: format!("fallback used: road EF={ROAD_FALLBACK_FACTOR} (distance or weight missing)"),
                confidence: TRANSPORT_FALLBACK_CONFIDENCE,
            },
            None => Enrichment::Fallback {
                factor: ROAD_FALLBACK_FACTOR,
                reason: format!(
                    "fallback used: road EF={ROAD_FALLBACK_FACTOR} (no transport factor for mode '{}')",
                    shipment.mode
                ),
                confidence: TRANSPORT_FALLBACK_CONFIDENCE,
            },
        }
    }

    /// Supplier intensity lookup for a shipment's purchased goods.
    pub fn enrich_supplier(
        &self,
        shipment: &ShipmentState,
        supplier: Option<&SupplierState>,
    ) -> Enrichment {
        let intensity = supplier
            .and_then(|s| s.emissions_intensity_kgco2e_per_unit)
            .filter(|v| v.is_finite() && *v >= 0.0);

        match intensity {
            Some(value) if shipment.quantity.is_some() => Enrichment::Matched {
                factor: value,
                factor_ref: None,
                confidence: SUPPLIER_MATCHED_CONFIDENCE,
            },
            Some(_) => Enrichment::Fallback {
                factor: PROXY_INTENSITY,
                reason: format!(
                    "fallback used: proxy intensity {PROXY_INTENSITY} kgCO2e/unit (quantity missing)"
                ),
                confidence: SUPPLIER_FALLBACK_CONFIDENCE,
            },
            None => Enrichment::Fallback {
                factor: PROXY_INTENSITY,
                reason: format!("fallback used: proxy intensity {PROXY_INTENSITY} kgCO2e/unit"),
                confidence: SUPPLIER_FALLBACK_CONFIDENCE,
            },
        }
    }

    pub fn enrich_electricity(&self, bill: &ElectricityBillState) -> Enrichment {
        if bill.kwh.is_some() {
            Enrichment::Matched {
                factor: GRID_FACTOR,
                factor_ref: Some(FactorRef {
                    factor_key: GRID_FACTOR_KEY.to_string(),
                    factor_version: GRID_FACTOR_VERSION.to_string(),
                }),
                confidence: ELECTRICITY_MATCHED_CONFIDENCE,
            }
        } else {
            Enrichment::Fallback {
                factor: 0.0,
                reason: "kwh missing: electricity line recorded as zero".to_string(),
                confidence: ELECTRICITY_FALLBACK_CONFIDENCE,
            }
        }
    }

    /// Transport and purchased-goods lines for one shipment, in that order.
    pub fn compile_shipment(
        &self,
        shipment: &ShipmentState,
        supplier: Option<&SupplierState>,
        computed_at: DateTime<Utc>,
    ) -> Vec<LedgerLine> {
        vec![
            self.transport_line(shipment, computed_at),
            self.purchased_goods_line(shipment, supplier, computed_at),
        ]
    }

    pub fn transport_line(&self, shipment: &ShipmentState, computed_at: DateTime<Utc>) -> LedgerLine {
        let enrichment = self.enrich_transport(shipment);
        let mut assumptions = Assumptions::default();
        let distance = multiplicand("distance_km", shipment.distance_km, &mut assumptions);
        let weight = multiplicand("weight_tons", shipment.weight_tons, &mut assumptions);
        let kg_co2e = distance * weight * enrichment.factor();

        let lineage = Lineage {
            sources: vec![LineageSource {
                feed: EntityKind::Shipment.feed_file().to_string(),
                entity_key: shipment.shipment_id.clone(),
                event_time: shipment.event_time,
            }],
        };

        let confidence = enrichment.confidence();
        let (method, factor_ref) = settle(enrichment, Method::ActivityFactor, &mut assumptions);

        LedgerLine {
            ledger_id: LedgerLineId::compose(
                ActivityType::Shipment,
                &shipment.shipment_id,
                Category::Transport,
            ),
            activity_id: shipment.shipment_id.clone(),
            activity_type: ActivityType::Shipment,
            scope: Scope::Scope3,
            category: Category::Transport,
            kg_co2e: clamp_kg(kg_co2e),
            method,
            confidence,
            factor_ref,
            lineage,
            assumptions,
            computed_at,
            period_date: shipment.period_date,
            supplier_id: shipment.supplier_id.clone(),
            lane_id: Some(shipment.lane_id.clone()),
            sku: shipment.sku.clone(),
            facility_id: shipment.facility_id.clone(),
        }
    }

    pub fn purchased_goods_line(
        &self,
        shipment: &ShipmentState,
        supplier: Option<&SupplierState>,
        computed_at: DateTime<Utc>,
    ) -> LedgerLine {
        let enrichment = self.enrich_supplier(shipment, supplier);
        let mut assumptions = Assumptions::default();
        let quantity = multiplicand("quantity", shipment.quantity, &mut assumptions);
        let kg_co2e = quantity * enrichment.factor();

        let mut sources = vec![LineageSource {
            feed: EntityKind::Shipment.feed_file().to_string(),
            entity_key: shipment.shipment_id.clone(),
            event_time: shipment.event_time,
        }];
        match supplier {
            Some(s) => {
                sources.push(LineageSource {
                    feed: EntityKind::Supplier.feed_file().to_string(),
                    entity_key: s.supplier_id.clone(),
                    event_time: s.last_updated_at,
                });
                if let (false, Some(version)) = (enrichment.is_fallback(), &s.intensity_version) {
                    assumptions.note(format!("supplier intensity version {version}"));
                }
            }
            None => match &shipment.supplier_id {
                Some(id) => assumptions.note(format!("supplier {id} not yet resolved")),
                None => assumptions.note("shipment has no supplier"),
            },
        }

        let confidence = enrichment.confidence();
        let (method, factor_ref) = settle(enrichment, Method::SupplierIntensity, &mut assumptions);

        LedgerLine {
            ledger_id: LedgerLineId::compose(
                ActivityType::PurchasedGoods,
                &shipment.shipment_id,
                Category::PurchasedGoods,
            ),
            activity_id: shipment.shipment_id.clone(),
            activity_type: ActivityType::PurchasedGoods,
            scope: Scope::Scope3,
            category: Category::PurchasedGoods,
            kg_co2e: clamp_kg(kg_co2e),
            method,
            confidence,
            factor_ref,
            lineage: Lineage { sources },
            assumptions,
            computed_at,
            period_date: shipment.period_date,
            supplier_id: shipment.supplier_id.clone(),
            lane_id: Some(shipment.lane_id.clone()),
            sku: shipment.sku.clone(),
            facility_id: shipment.facility_id.clone(),
        }
    }

    pub fn compile_bill(&self, bill: &ElectricityBillState, computed_at: DateTime<Utc>) -> LedgerLine {
        let enrichment = self.enrich_electricity(bill);
        let mut assumptions = Assumptions::default();
        let kwh = multiplicand("kwh", bill.kwh, &mut assumptions);
        let kg_co2e = kwh * enrichment.factor();

        let factor_ref = match &enrichment {
            Enrichment::Matched { factor_ref, .. } => factor_ref.clone(),
            Enrichment::Fallback { .. } => None,
        };
        if factor_ref.is_some() {
            assumptions.note(format!("grid EF fixed to {GRID_FACTOR:.2} kgCO2e/kWh"));
        }
        let confidence = enrichment.confidence();
        let (method, _) = settle(enrichment, Method::ActivityFactor, &mut assumptions);

        LedgerLine {
            ledger_id: LedgerLineId::compose(
                ActivityType::ElectricityBill,
                &bill.bill_id,
                Category::Electricity,
            ),
            activity_id: bill.bill_id.clone(),
            activity_type: ActivityType::ElectricityBill,
            scope: Scope::Scope2,
            category: Category::Electricity,
            kg_co2e: clamp_kg(kg_co2e),
            method,
            confidence,
            factor_ref,
            lineage: Lineage {
                sources: vec![LineageSource {
                    feed: EntityKind::ElectricityBill.feed_file().to_string(),
                    entity_key: bill.bill_id.clone(),
                    event_time: bill.event_time,
                }],
            },
            assumptions,
            computed_at,
            period_date: bill.period_date,
            supplier_id: None,
            lane_id: None,
            sku: None,
            facility_id: Some(bill.facility_id.clone()).filter(|f| !f.is_empty()),
        }
    }
}

/// Record the enrichment outcome in the assumptions; returns method and factor ref.
fn settle(
    enrichment: Enrichment,
    matched_method: Method,
    assumptions: &mut Assumptions,
) -> (Method, Option<FactorRef>) {
    match enrichment {
        Enrichment::Matched { factor_ref, .. } => (matched_method, factor_ref),
        Enrichment::Fallback { reason, .. } => {
            assumptions.fallback(reason);
            (Method::FallbackProxy, None)
        }
    }
}

/// A usable multiplicand, or 0.0 with an exclusion note.
fn multiplicand(name: &str, value: Option<f64>, assumptions: &mut Assumptions) -> f64 {
    match value {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        Some(v) => {
            assumptions.exclusion(format!("{name} invalid ({v}): counted as 0"));
            0.0
        }
        None => {
            assumptions.exclusion(format!("{name} missing: counted as 0"));
            0.0
        }
    }
}

fn clamp_kg(kg: f64) -> f64 {
    if kg.is_finite() && kg > 0.0 { kg } else { 0.0 }
}
