//! Static emission factor reference.
//!
//! Factors are loaded once into an immutable [`FactorTable`]. A reload builds a
//! brand new table and swaps it into the [`FactorReference`]; readers holding the
//! previous `Arc` keep a consistent view until they ask again.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category name used by transport factors.
pub const TRANSPORT_CATEGORY: &str = "transport";

/// One row of the emission factor reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionFactor {
    pub factor_key: String,
    pub factor_version: String,
    pub scope: u8,
    pub category: String,
    #[serde(default)]
    pub mode: String,
    pub unit: String,
    pub ef_value: f64,
    pub source: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FactorError {
    #[error("factor reference is empty")]
    Empty,

    #[error("duplicate factor_key: {0}")]
    Duplicate(String),

    #[error("factor {factor_key} has invalid value {value}")]
    InvalidValue { factor_key: String, value: f64 },

    #[error("factor {factor_key} has invalid scope {scope}")]
    InvalidScope { factor_key: String, scope: u8 },
}

/// Immutable factor lookup, keyed by `factor_key`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorTable {
    by_key: BTreeMap<String, EmissionFactor>,
}

impl FactorTable {
    /// Build a table, rejecting duplicates and unusable values.
    pub fn from_factors(factors: impl IntoIterator<Item = EmissionFactor>) -> Result<Self, FactorError> {
        let mut by_key = BTreeMap::new();
        for f in factors {
            if !(f.ef_value.is_finite() && f.ef_value >= 0.0) {
                return Err(FactorError::InvalidValue {
                    factor_key: f.factor_key,
                    value: f.ef_value,
                });
            }
            if !(1..=3).contains(&f.scope) {
                return Err(FactorError::InvalidScope {
                    factor_key: f.factor_key,
                    scope: f.scope,
                });
            }
            if by_key.contains_key(&f.factor_key) {
                return Err(FactorError::Duplicate(f.factor_key));
            }
            by_key.insert(f.factor_key.clone(), f);
        }
        if by_key.is_empty() {
            return Err(FactorError::Empty);
        }
        Ok(Self { by_key })
    }

    pub fn get(&self, factor_key: &str) -> Option<&EmissionFactor> {
        self.by_key.get(factor_key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Transport factor for a mode (case-insensitive).
    ///
    /// When several transport factors share a mode, the lowest `factor_key` wins.
    pub fn transport_factor(&self, mode: &str) -> Option<&EmissionFactor> {
        let mode = mode.trim();
        if mode.is_empty() {
            return None;
        }
        self.by_key.values().find(|f| {
            f.category.eq_ignore_ascii_case(TRANSPORT_CATEGORY) && f.mode.trim().eq_ignore_ascii_case(mode)
        })
    }
}

/// Shared handle to the current factor snapshot.
#[derive(Debug, Default)]
pub struct FactorReference {
    current: RwLock<Arc<FactorTable>>,
}

impl FactorReference {
    pub fn new(table: FactorTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<FactorTable> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a new snapshot, returning the previous one.
    pub fn replace(&self, table: FactorTable) -> Arc<FactorTable> {
        let next = Arc::new(table);
        match self.current.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(key: &str, category: &str, mode: &str, value: f64) -> EmissionFactor {
        EmissionFactor {
            factor_key: key.to_string(),
            factor_version: "v1".to_string(),
            scope: 3,
            category: category.to_string(),
            mode: mode.to_string(),
            unit: "kgCO2e/ton-km".to_string(),
            ef_value: value,
            source: "test".to_string(),
        }
    }

    #[test]
    fn transport_lookup_matches_mode_case_insensitively() {
        let table = FactorTable::from_factors(vec![
            factor("tr_road", "transport", "road", 0.12),
            factor("tr_rail", "transport", "rail", 0.04),
            factor("grid", "electricity", "", 0.7),
        ])
        .unwrap();

        assert_eq!(table.transport_factor("road").unwrap().ef_value, 0.12);
        assert_eq!(table.transport_factor(" Rail ").unwrap().factor_key, "tr_rail");
        assert!(table.transport_factor("sea").is_none());
        assert!(table.transport_factor("").is_none());
    }

    #[test]
    fn lowest_key_wins_among_same_mode_factors() {
        let table = FactorTable::from_factors(vec![
            factor("tr_road_b", "transport", "road", 0.2),
            factor("tr_road_a", "transport", "road", 0.1),
        ])
        .unwrap();
        assert_eq!(table.transport_factor("road").unwrap().factor_key, "tr_road_a");
    }

    #[test]
    fn invalid_tables_are_rejected() {
        assert_eq!(FactorTable::from_factors(vec![]).unwrap_err(), FactorError::Empty);
        assert!(matches!(
            FactorTable::from_factors(vec![factor("x", "transport", "road", -1.0)]),
            Err(FactorError::InvalidValue { .. })
        ));
        assert!(matches!(
            FactorTable::from_factors(vec![
                factor("x", "transport", "road", 1.0),
                factor("x", "transport", "rail", 1.0),
            ]),
            Err(FactorError::Duplicate(k)) if k == "x"
        ));
    }

    #[test]
    fn replace_swaps_snapshot_without_touching_old_readers() {
        let reference = FactorReference::new(
            FactorTable::from_factors(vec![factor("tr_road", "transport", "road", 0.12)]).unwrap(),
        );
        let before = reference.snapshot();

        let previous = reference.replace(
            FactorTable::from_factors(vec![factor("tr_road", "transport", "road", 0.10)]).unwrap(),
        );

        assert_eq!(before.transport_factor("road").unwrap().ef_value, 0.12);
        assert_eq!(previous.transport_factor("road").unwrap().ef_value, 0.12);
        assert_eq!(reference.snapshot().transport_factor("road").unwrap().ef_value, 0.10);
    }
}
