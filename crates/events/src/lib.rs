//! Raw activity events and the mechanics to move them around.
//!
//! Events are append-only facts read from the activity feeds. Nothing in this
//! crate interprets them beyond extracting the entity key and event time.

pub mod activity;
pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use activity::{ActivityEvent, ElectricityBillRecord, EntityKind, ShipmentRecord, SupplierRecord};
pub use bus::{EventBus, Subscription};
pub use envelope::{ActivityEnvelope, EventEnvelope};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
