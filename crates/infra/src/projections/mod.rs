//! Projections over the activity feeds.
//!
//! Projections are:
//! - **Rebuildable**: state can be reconstructed by replaying the feeds
//! - **Idempotent**: safe for at-least-once delivery
//! - **Commutative**: arrival order does not change the result

pub mod latest_state;

pub use latest_state::{EntityRef, KeepMax, LatestStateProjection, Resolved};
