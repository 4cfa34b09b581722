use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use anyhow::Result;

// ============================================================================
// Event Envelope
// ============================================================================
//
// Wraps an event with identity, ordering and tracing metadata. Used both for
// the persisted shop-order history and for outbound realtime notifications.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    pub event_type: String,
    pub event_version: i32,

    pub event_data: E,

    // Causation & Correlation
    pub causation_id: Option<Uuid>,
    pub correlation_id: Uuid,

    /// Actor whose command produced the event
    pub user_id: Option<Uuid>,

    pub timestamp: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(aggregate_id: Uuid, sequence_number: i64, event_data: E, correlation_id: Uuid) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            event_type: event_data.event_name().to_string(),
            event_version: event_data.event_version(),
            event_data,
            causation_id: None,
            correlation_id,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Stable name written to `EventEnvelope::event_type`
    fn event_name(&self) -> &'static str;

    fn event_version(&self) -> i32 {
        1
    }
}

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event<E: DeserializeOwned>(json: &str) -> Result<E> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type")]
    enum Ping {
        Sent { count: u32 },
        Lost,
    }

    impl DomainEvent for Ping {
        fn event_name(&self) -> &'static str {
            match self {
                Ping::Sent { .. } => "PingSent",
                Ping::Lost => "PingLost",
            }
        }
    }

    #[test]
    fn test_envelope_takes_type_from_event_instance() {
        let aggregate_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let actor = Uuid::new_v4();

        let envelope = EventEnvelope::new(aggregate_id, 3, Ping::Lost, correlation_id).with_user(actor);

        assert_eq!(envelope.event_type, "PingLost");
        assert_eq!(envelope.sequence_number, 3);
        assert_eq!(envelope.user_id, Some(actor));
        assert_eq!(envelope.correlation_id, correlation_id);
    }

    #[test]
    fn test_envelope_survives_json_storage() {
        let envelope = EventEnvelope::new(Uuid::new_v4(), 1, Ping::Sent { count: 2 }, Uuid::new_v4());

        let json = serialize_event(&envelope).unwrap();
        let restored: EventEnvelope<Ping> = deserialize_event(&json).unwrap();

        assert_eq!(restored, envelope);
    }
}
