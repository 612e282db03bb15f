//! Ledger line model.
//!
//! A ledger line is the unit of emissions accounting. Its identifier is derived
//! from what it describes, so recompiling the same activity always targets the
//! same line; a correction is a new version under the same id.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_core::DomainError;

/// GHG protocol scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Scope {
    Scope1,
    Scope2,
    Scope3,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Scope1, Scope::Scope2, Scope::Scope3];

    pub fn as_u8(&self) -> u8 {
        match self {
            Scope::Scope1 => 1,
            Scope::Scope2 => 2,
            Scope::Scope3 => 3,
        }
    }
}

impl From<Scope> for u8 {
    fn from(value: Scope) -> Self {
        value.as_u8()
    }
}

impl TryFrom<u8> for Scope {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Scope::Scope1),
            2 => Ok(Scope::Scope2),
            3 => Ok(Scope::Scope3),
            other => Err(DomainError::validation(format!("scope must be 1, 2 or 3 (got {other})"))),
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Transport,
    PurchasedGoods,
    Electricity,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Transport => "transport",
            Category::PurchasedGoods => "purchased_goods",
            Category::Electricity => "electricity",
        }
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "transport" => Ok(Category::Transport),
            "purchased_goods" => Ok(Category::PurchasedGoods),
            "electricity" => Ok(Category::Electricity),
            other => Err(DomainError::validation(format!("unknown category '{other}'"))),
        }
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of activity a line accounts for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Shipment,
    PurchasedGoods,
    ElectricityBill,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Shipment => "shipment",
            ActivityType::PurchasedGoods => "purchased_goods",
            ActivityType::ElectricityBill => "electricity_bill",
        }
    }
}

impl FromStr for ActivityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "shipment" => Ok(ActivityType::Shipment),
            "purchased_goods" => Ok(ActivityType::PurchasedGoods),
            "electricity_bill" => Ok(ActivityType::ElectricityBill),
            other => Err(DomainError::validation(format!("unknown activity type '{other}'"))),
        }
    }
}

impl core::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a line's value was computed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ActivityFactor,
    SupplierIntensity,
    FallbackProxy,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ActivityFactor => "activity_factor",
            Method::SupplierIntensity => "supplier_intensity",
            Method::FallbackProxy => "fallback_proxy",
        }
    }
}

impl FromStr for Method {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "activity_factor" => Ok(Method::ActivityFactor),
            "supplier_intensity" => Ok(Method::SupplierIntensity),
            "fallback_proxy" => Ok(Method::FallbackProxy),
            other => Err(DomainError::validation(format!("unknown method '{other}'"))),
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping dimension for hotspot analysis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Supplier,
    Lane,
    Sku,
    Facility,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Supplier => "supplier",
            Dimension::Lane => "lane",
            Dimension::Sku => "sku",
            Dimension::Facility => "facility",
        }
    }
}

impl FromStr for Dimension {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "supplier" => Ok(Dimension::Supplier),
            "lane" => Ok(Dimension::Lane),
            "sku" => Ok(Dimension::Sku),
            "facility" => Ok(Dimension::Facility),
            other => Err(DomainError::validation(format!(
                "unknown dimension '{other}' (expected supplier, lane, sku or facility)"
            ))),
        }
    }
}

impl core::fmt::Display for Dimension {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic ledger line identifier: `{activity_type}:{activity_id}:{category}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerLineId(String);

impl LedgerLineId {
    pub fn compose(activity_type: ActivityType, activity_id: &str, category: Category) -> Self {
        Self(format!("{activity_type}:{activity_id}:{category}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LedgerLineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LedgerLineId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Factor used for a line (key + version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorRef {
    pub factor_key: String,
    pub factor_version: String,
}

/// One upstream record a line was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageSource {
    pub feed: String,
    pub entity_key: String,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub sources: Vec<LineageSource>,
}

/// Free-text record of what the computation had to assume.
///
/// `fallbacks` stays empty when no fallback constant was used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assumptions {
    pub notes: Vec<String>,
    pub fallbacks: Vec<String>,
    pub exclusions: Vec<String>,
}

impl Assumptions {
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn fallback(&mut self, fallback: impl Into<String>) {
        self.fallbacks.push(fallback.into());
    }

    pub fn exclusion(&mut self, exclusion: impl Into<String>) {
        self.exclusions.push(exclusion.into());
    }
}

/// An immutable ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub ledger_id: LedgerLineId,
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub scope: Scope,
    pub category: Category,
    pub kg_co2e: f64,
    pub method: Method,
    pub confidence: f64,
    pub factor_ref: Option<FactorRef>,
    pub lineage: Lineage,
    pub assumptions: Assumptions,
    pub computed_at: DateTime<Utc>,
    pub period_date: NaiveDate,
    pub supplier_id: Option<String>,
    pub lane_id: Option<String>,
    pub sku: Option<String>,
    pub facility_id: Option<String>,
}

impl LedgerLine {
    /// Equal in everything except `computed_at`.
    ///
    /// Used by stores to keep an upsert of unchanged inputs a true no-op.
    pub fn same_content(&self, other: &LedgerLine) -> bool {
        self.ledger_id == other.ledger_id
            && self.activity_id == other.activity_id
            && self.activity_type == other.activity_type
            && self.scope == other.scope
            && self.category == other.category
            && self.kg_co2e.to_bits() == other.kg_co2e.to_bits()
            && self.method == other.method
            && self.confidence.to_bits() == other.confidence.to_bits()
            && self.factor_ref == other.factor_ref
            && self.lineage == other.lineage
            && self.assumptions == other.assumptions
            && self.period_date == other.period_date
            && self.supplier_id == other.supplier_id
            && self.lane_id == other.lane_id
            && self.sku == other.sku
            && self.facility_id == other.facility_id
    }

    /// The line's key for a hotspot dimension, if it has one.
    pub fn dimension_key(&self, dimension: Dimension) -> Option<&str> {
        let key = match dimension {
            Dimension::Supplier => self.supplier_id.as_deref(),
            Dimension::Lane => self.lane_id.as_deref(),
            Dimension::Sku => self.sku.as_deref(),
            Dimension::Facility => self.facility_id.as_deref(),
        };
        key.filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_id_is_composed_from_type_id_and_category() {
        let id = LedgerLineId::compose(ActivityType::Shipment, "SHP_1", Category::Transport);
        assert_eq!(id.as_str(), "shipment:SHP_1:transport");

        let id = LedgerLineId::compose(ActivityType::PurchasedGoods, "SHP_1", Category::PurchasedGoods);
        assert_eq!(id.as_str(), "purchased_goods:SHP_1:purchased_goods");
    }

    #[test]
    fn scope_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Scope::Scope2).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Scope>("3").unwrap(), Scope::Scope3);
        assert!(serde_json::from_str::<Scope>("4").is_err());
    }

    #[test]
    fn dimension_parsing_rejects_unknown_names() {
        assert_eq!("lane".parse::<Dimension>().unwrap(), Dimension::Lane);
        assert!(matches!("region".parse::<Dimension>(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn enums_round_trip_through_their_wire_names() {
        assert_eq!("purchased_goods".parse::<Category>().unwrap(), Category::PurchasedGoods);
        assert_eq!(Method::FallbackProxy.to_string(), "fallback_proxy");
        assert_eq!(
            serde_json::to_string(&ActivityType::ElectricityBill).unwrap(),
            "\"electricity_bill\""
        );
    }
}
