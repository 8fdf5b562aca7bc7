//! Event types for the store change feed.
//!
//! - `ResourceEvent` - a committed version of a resource
//! - `StoreEvent` - unified enum including administrative resets

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ============================================================================
// Resource Events
// ============================================================================

/// Type of resource change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceEventType {
    /// First version of a logical id
    Created,
    /// A later present version
    Updated,
    /// A tombstone version
    Deleted,
}

impl ResourceEventType {
    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEventType::Created => "created",
            ResourceEventType::Updated => "updated",
            ResourceEventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ResourceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event representing one committed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    pub event_type: ResourceEventType,
    /// FHIR resource type (e.g., "Patient", "Observation")
    pub resource_type: String,
    pub resource_id: String,
    pub version_id: String,
    /// Store-wide sequence number of the committed entry
    pub sequence: u64,
    /// The resource data as JSON (None for deletions)
    pub resource: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ResourceEvent {
    pub fn new(
        event_type: ResourceEventType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        version_id: impl Into<String>,
        sequence: u64,
        resource: Option<serde_json::Value>,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            event_type,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            version_id: version_id.into(),
            sequence,
            resource,
            timestamp,
        }
    }

    /// Check if this event matches a filter by resource type.
    pub fn matches_type(&self, filter_type: Option<&str>) -> bool {
        match filter_type {
            Some(t) => self.resource_type == t,
            None => true,
        }
    }

    /// Check if this event matches a filter by event type.
    pub fn matches_event_type(&self, filter: Option<ResourceEventType>) -> bool {
        match filter {
            Some(t) => self.event_type == t,
            None => true,
        }
    }
}

// ============================================================================
// Store Events
// ============================================================================

/// Everything the broadcaster can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreEvent {
    Resource(ResourceEvent),
    /// Every entry of one logical id was removed.
    #[serde(rename_all = "camelCase")]
    Purged {
        resource_type: String,
        resource_id: String,
    },
    /// The whole store was reset.
    Cleaned,
}

impl StoreEvent {
    pub fn as_resource(&self) -> Option<&ResourceEvent> {
        match self {
            StoreEvent::Resource(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResourceEvent> for StoreEvent {
    fn from(event: ResourceEvent) -> Self {
        StoreEvent::Resource(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample(event_type: ResourceEventType) -> ResourceEvent {
        ResourceEvent::new(
            event_type,
            "Patient",
            "p1",
            "2",
            7,
            None,
            datetime!(2024-01-01 00:00:00 UTC),
        )
    }

    #[test]
    fn test_resource_event_matches() {
        let event = sample(ResourceEventType::Updated);
        assert!(event.matches_type(Some("Patient")));
        assert!(!event.matches_type(Some("Observation")));
        assert!(event.matches_type(None));
        assert!(event.matches_event_type(Some(ResourceEventType::Updated)));
        assert!(!event.matches_event_type(Some(ResourceEventType::Deleted)));
    }

    #[test]
    fn test_store_event_from() {
        let event: StoreEvent = sample(ResourceEventType::Created).into();
        assert_eq!(event.as_resource().map(|e| e.sequence), Some(7));
        assert!(StoreEvent::Cleaned.as_resource().is_none());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(StoreEvent::from(sample(ResourceEventType::Deleted)))
            .unwrap();
        assert_eq!(json["kind"], "resource");
        assert_eq!(json["eventType"], "deleted");
        assert_eq!(json["resourceId"], "p1");
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");

        let purged = serde_json::to_value(StoreEvent::Purged {
            resource_type: "Patient".into(),
            resource_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(purged["kind"], "purged");
        assert_eq!(purged["resourceType"], "Patient");
    }
}
