//! Emissions accounting (ledger compilation).
//!
//! Pure domain logic only: no IO, no persistence concerns. Resolved entity
//! state plus the factor reference go in, immutable ledger lines come out.

pub mod compiler;
pub mod factor;
pub mod lane;
pub mod ledger;
pub mod state;

pub use compiler::{Enrichment, LedgerCompiler};
pub use factor::{EmissionFactor, FactorError, FactorReference, FactorTable};
pub use lane::lane_id;
pub use ledger::{
    ActivityType, Assumptions, Category, Dimension, FactorRef, LedgerLine, LedgerLineId, Lineage,
    LineageSource, Method, Scope,
};
pub use state::{ElectricityBillState, ShipmentState, SupplierState};
