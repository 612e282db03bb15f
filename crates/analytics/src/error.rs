use thiserror::Error;

use carbonledger_core::DomainError;

/// Analytics failures.
///
/// Empty windows are not errors: they produce zeroed results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ledger read failed: {0}")]
    Read(String),
}

impl AnalyticsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

impl From<DomainError> for AnalyticsError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::NotFound => AnalyticsError::NotFound("resource".to_string()),
            other => AnalyticsError::InvalidRequest(other.to_string()),
        }
    }
}

/// Validate a percentage parameter (`0..=100`).
pub(crate) fn check_pct(name: &str, value: f64) -> Result<f64, AnalyticsError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(AnalyticsError::invalid(format!(
            "{name} must be between 0 and 100 (got {value})"
        )))
    }
}
