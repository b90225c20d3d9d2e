use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{RideId, VehicleId};
use crate::event_sourcing::core::EntityEvent;

// ============================================================================
// Ride Events - Facts in a ride's lifecycle
// ============================================================================

/// Ride Event - Union type for all ride events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RideEvent {
    Booked(RideBooked),
    VehicleAssigned(VehicleAssigned),
    Started(RideStarted),
    Completed(RideCompleted),
    Cancelled(RideCancelled),
}

impl EntityEvent for RideEvent {
    type Id = RideId;

    fn entity_id(&self) -> &RideId {
        match self {
            RideEvent::Booked(e) => &e.ride_id,
            RideEvent::VehicleAssigned(e) => &e.ride_id,
            RideEvent::Started(e) => &e.ride_id,
            RideEvent::Completed(e) => &e.ride_id,
            RideEvent::Cancelled(e) => &e.ride_id,
        }
    }

    fn created_at(&self) -> DateTime<Utc> {
        match self {
            RideEvent::Booked(e) => e.occurred_at,
            RideEvent::VehicleAssigned(e) => e.occurred_at,
            RideEvent::Started(e) => e.occurred_at,
            RideEvent::Completed(e) => e.occurred_at,
            RideEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Ride Booked - Initial event in a ride's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideBooked {
    pub ride_id: RideId,
    pub origin: String,
    pub destination: String,
    pub pickup_time: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleAssigned {
    pub ride_id: RideId,
    pub vehicle: VehicleId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStarted {
    pub ride_id: RideId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideCompleted {
    pub ride_id: RideId,
    pub occurred_at: DateTime<Utc>,
}

/// Ride Cancelled - Ride lifecycle ended without completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideCancelled {
    pub ride_id: RideId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = RideEvent::Started(RideStarted {
            ride_id: RideId::new(),
            occurred_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Started");
        assert!(json["data"]["ride_id"].is_string());

        let back: RideEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_exposes_ride_id() {
        let ride_id = RideId::new();
        let event = RideEvent::VehicleAssigned(VehicleAssigned {
            ride_id,
            vehicle: VehicleId::new("V1"),
            occurred_at: Utc::now(),
        });
        assert_eq!(event.entity_id(), &ride_id);
    }
}
