use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carbonledger_core::{DomainResult, EventId, parse_event_time};

use crate::activity::{ActivityEvent, EntityKind};
use crate::event::Event;

/// Envelope for an ingested event, carrying stream metadata.
///
/// Notes:
/// - `event_time` is the normalized UTC instant used for "latest wins" decisions.
/// - `arrival_seq` is the ingestion order. It is metadata only: it never decides
///   which event wins, so redelivery in any order converges to the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    entity_kind: EntityKind,
    entity_key: String,
    event_time: DateTime<Utc>,
    arrival_seq: u64,
    payload: E,
}

/// Envelope over any activity feed row.
pub type ActivityEnvelope = EventEnvelope<ActivityEvent>;

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        event_time: DateTime<Utc>,
        arrival_seq: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            entity_kind,
            entity_key: entity_key.into(),
            event_time,
            arrival_seq,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn arrival_seq(&self) -> u64 {
        self.arrival_seq
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl ActivityEnvelope {
    /// Wrap a feed row, normalizing its event time.
    ///
    /// Fails only when the timestamp cannot be parsed at all.
    pub fn from_activity(event: ActivityEvent, arrival_seq: u64) -> DomainResult<Self> {
        let event_time = parse_event_time(event.raw_event_time())?;
        Ok(Self::new(
            EventId::new(),
            event.kind(),
            event.entity_key().to_string(),
            event_time,
            arrival_seq,
            event,
        ))
    }
}
