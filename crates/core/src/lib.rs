//! `carbonledger-core`: shared building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): the
//! error model, strongly-typed identifiers and time handling for event streams
//! and reporting windows.

pub mod error;
pub mod id;
pub mod time;

pub use error::{DomainError, DomainResult};
pub use id::{EventId, ReportId};
pub use time::{DateWindow, parse_date, parse_event_time};
