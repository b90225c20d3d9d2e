use chrono::{DateTime, Utc};

use super::value_objects::{Ride, RideId, RideStatus, VehicleId};
use crate::event_sourcing::core::EntityCommand;

// ============================================================================
// Ride Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum RideCommand {
    Book {
        ride_id: RideId,
        origin: String,
        destination: String,
        pickup_time: DateTime<Utc>,
    },
    AssignVehicle {
        ride_id: RideId,
        vehicle: VehicleId,
    },
    StartRide {
        ride_id: RideId,
    },
    CompleteRide {
        ride_id: RideId,
    },
    CancelRide {
        ride_id: RideId,
        reason: Option<String>,
    },
    GetRide {
        ride_id: RideId,
    },
}

/// Reply to a ride command. Rejections are ordinary values.
#[derive(Debug, Clone, PartialEq)]
pub enum RideReply {
    Accepted,
    InvalidBooking(String),
    AlreadyExists,
    NotFound,
    AssignmentReceived,
    AlreadyAssigned(VehicleId),
    NoVehicleAssigned,
    Started,
    AlreadyStarted,
    NotStarted,
    Completed,
    Cancelled,
    RideFinished(RideStatus),
    Ride(Box<Ride>),
}

impl RideCommand {
    /// Why a booking cannot be accepted, if it cannot.
    pub fn booking_problem(&self) -> Option<String> {
        match self {
            RideCommand::Book {
                origin, destination, ..
            } => {
                if origin.trim().is_empty() || destination.trim().is_empty() {
                    Some("origin and destination are required".to_string())
                } else if origin == destination {
                    Some("origin and destination must differ".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl EntityCommand for RideCommand {
    type Id = RideId;
    type State = Ride;
    type Reply = RideReply;

    fn entity_id(&self) -> &RideId {
        match self {
            RideCommand::Book { ride_id, .. }
            | RideCommand::AssignVehicle { ride_id, .. }
            | RideCommand::StartRide { ride_id }
            | RideCommand::CompleteRide { ride_id }
            | RideCommand::CancelRide { ride_id, .. }
            | RideCommand::GetRide { ride_id } => ride_id,
        }
    }

    fn initialized_reply(&self, ride: &Ride) -> RideReply {
        use RideStatus::*;

        match self {
            RideCommand::Book { .. } => RideReply::AlreadyExists,
            RideCommand::GetRide { .. } => RideReply::Ride(Box::new(ride.clone())),
            _ if ride.status.is_finished() => RideReply::RideFinished(ride.status),

            RideCommand::AssignVehicle { .. } => match (&ride.status, &ride.vehicle) {
                (Pending, _) => RideReply::AssignmentReceived,
                (_, Some(vehicle)) => RideReply::AlreadyAssigned(vehicle.clone()),
                (_, None) => RideReply::NoVehicleAssigned,
            },
            RideCommand::StartRide { .. } => match ride.status {
                Pending => RideReply::NoVehicleAssigned,
                Assigned => RideReply::Started,
                _ => RideReply::AlreadyStarted,
            },
            RideCommand::CompleteRide { .. } => match ride.status {
                Pending => RideReply::NoVehicleAssigned,
                Assigned => RideReply::NotStarted,
                _ => RideReply::Completed,
            },
            RideCommand::CancelRide { .. } => match ride.status {
                Pending | Assigned => RideReply::Cancelled,
                _ => RideReply::AlreadyStarted,
            },
        }
    }

    fn uninitialized_reply(&self) -> RideReply {
        match self {
            RideCommand::Book { .. } => match self.booking_problem() {
                Some(problem) => RideReply::InvalidBooking(problem),
                None => RideReply::Accepted,
            },
            _ => RideReply::NotFound,
        }
    }
}
