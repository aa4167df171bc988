use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// ============================================================================
// Event Envelope - Immutable Stored Fact
// ============================================================================
//
// The payload stays opaque JSON at this level. Only the owning aggregate
// knows how to decode it, keyed by the `event_type` discriminator.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    /// 1-based position of this event in its aggregate's stream
    pub aggregate_version: i64,
    pub timestamp: DateTime<Utc>,
    pub data: String,
    pub metadata: Option<String>,
}

impl EventEnvelope {
    /// Wrap an already-serialized payload. The id is a v7 UUID so ids
    /// created in the same millisecond still sort in creation order.
    pub fn new(
        aggregate_id: Uuid,
        aggregate_version: i64,
        event_type: impl Into<String>,
        data: String,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_version,
            timestamp: Utc::now(),
            data,
            metadata: None,
        }
    }

    /// Serialize a typed event and wrap it.
    pub fn from_event<E: DomainEvent>(
        aggregate_id: Uuid,
        aggregate_version: i64,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_version,
            event.event_type(),
            serialize_event(event)?,
        ))
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Decode the opaque payload into a concrete payload struct.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        deserialize_event(&self.data)
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by the typed event of an aggregate. The payload is
/// serialized without the discriminator, which travels in the envelope.
pub trait DomainEvent: Send + Sync {
    fn event_type(&self) -> &'static str;

    fn payload(&self) -> Result<String, serde_json::Error>;
}

// ============================================================================
// Log Position - cursor into the global, ordered event log
// ============================================================================

/// Ordered by `recorded_at`, ties broken by the v7 event id.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub recorded_at: DateTime<Utc>,
    pub event_id: Uuid,
}

/// An envelope as handed to a subscriber, with its place in the log.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveredEvent {
    pub position: LogPosition,
    pub envelope: EventEnvelope,
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn serialize_event<E: DomainEvent + ?Sized>(event: &E) -> Result<String, serde_json::Error> {
    event.payload()
}

pub fn deserialize_event<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(json)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Renamed {
        name: String,
    }

    impl DomainEvent for Renamed {
        fn event_type(&self) -> &'static str {
            "Renamed"
        }

        fn payload(&self) -> Result<String, serde_json::Error> {
            serde_json::to_string(self)
        }
    }

    #[test]
    fn test_envelope_from_event() {
        let aggregate_id = Uuid::new_v4();
        let event = Renamed { name: "a".to_string() };

        let envelope = EventEnvelope::from_event(aggregate_id, 3, &event).unwrap();

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.aggregate_version, 3);
        assert_eq!(envelope.event_type, "Renamed");
        assert_eq!(envelope.metadata, None);
        assert_eq!(envelope.decode::<Renamed>().unwrap(), event);
    }

    #[test]
    fn test_decode_reports_bad_payload() {
        let envelope = EventEnvelope::new(Uuid::new_v4(), 1, "Renamed", "{not json".to_string());
        assert!(envelope.decode::<Renamed>().is_err());
    }

    #[test]
    fn test_log_position_orders_by_time_then_id() {
        let now = Utc::now();
        let first = LogPosition { recorded_at: now, event_id: Uuid::from_u128(1) };
        let second = LogPosition { recorded_at: now, event_id: Uuid::from_u128(2) };
        let later = LogPosition {
            recorded_at: now + chrono::Duration::milliseconds(1),
            event_id: Uuid::nil(),
        };

        assert!(first < second);
        assert!(second < later);
    }
}
