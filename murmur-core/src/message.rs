//! Event records handed to the publisher.

use serde::{Deserialize, Serialize};

/// A payload bound for a topic.
///
/// The broker never looks inside the payload; it is serialized to compact
/// JSON on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Destination topic
    pub topic: String,
    /// JSON body
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event from an already built JSON value.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { topic: topic.into(), payload }
    }

    /// Create an event from any serializable record.
    ///
    /// # Errors
    /// Returns an error if the record cannot be represented as JSON.
    pub fn from_record<T: Serialize>(topic: impl Into<String>, record: &T) -> crate::Result<Self> {
        Ok(Self::new(topic, serde_json::to_value(record)?))
    }

    /// Compact JSON text of the payload.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized.
    pub fn payload_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.payload)?)
    }
}

/// Traffic incident as produced by the 511 feed; its `area` is the topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEvent {
    /// Feed identifier
    pub event_id: String,
    /// County or region, used as topic
    pub area: String,
    /// Incident category
    pub event_type: String,
    /// Human readable summary
    pub headline: String,
    /// Last update time as reported by the feed
    pub updated: String,
}

impl TryFrom<&TrafficEvent> for Event {
    type Error = crate::Error;

    fn try_from(event: &TrafficEvent) -> crate::Result<Self> {
        Self::from_record(event.area.clone(), event)
    }
}
