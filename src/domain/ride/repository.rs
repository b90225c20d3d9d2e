use chrono::{DateTime, Utc};

use super::behavior::RideBehavior;
use super::commands::{RideCommand, RideReply};
use super::errors::RideError;
use super::value_objects::{Ride, RideId, RideStatus, VehicleId};
use crate::actors::EntityDirectory;

// ============================================================================
// Ride Repository - Domain-facing facade over the entity directory
// ============================================================================
//
// Turns domain calls into ride commands, routes them through the directory
// and decodes the generic reply into a per-operation outcome. A reply that
// does not fit the operation is reported as UnexpectedReply.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Accepted,
    AlreadyExists,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    Assigned,
    AlreadyAssigned(VehicleId),
    Finished(RideStatus),
    NotFound,
}

/// Outcome of start / complete / cancel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Done,
    NoVehicleAssigned,
    NotStarted,
    AlreadyStarted,
    Finished(RideStatus),
    NotFound,
}

#[derive(Clone)]
pub struct RideRepository {
    directory: EntityDirectory<RideBehavior>,
}

impl RideRepository {
    pub fn new(directory: EntityDirectory<RideBehavior>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &EntityDirectory<RideBehavior> {
        &self.directory
    }

    pub async fn book(
        &self,
        ride_id: RideId,
        origin: impl Into<String>,
        destination: impl Into<String>,
        pickup_time: DateTime<Utc>,
    ) -> Result<BookingOutcome, RideError> {
        let command = RideCommand::Book {
            ride_id,
            origin: origin.into(),
            destination: destination.into(),
            pickup_time,
        };

        match self.directory.send(command).await? {
            RideReply::Accepted => Ok(BookingOutcome::Accepted),
            RideReply::AlreadyExists => Ok(BookingOutcome::AlreadyExists),
            RideReply::InvalidBooking(problem) => Ok(BookingOutcome::Invalid(problem)),
            reply => Err(unexpected("book", reply)),
        }
    }

    pub async fn assign_vehicle(&self, ride_id: RideId, vehicle: VehicleId) -> Result<AssignmentOutcome, RideError> {
        match self.directory.send(RideCommand::AssignVehicle { ride_id, vehicle }).await? {
            RideReply::AssignmentReceived => Ok(AssignmentOutcome::Assigned),
            RideReply::AlreadyAssigned(current) => Ok(AssignmentOutcome::AlreadyAssigned(current)),
            RideReply::RideFinished(status) => Ok(AssignmentOutcome::Finished(status)),
            RideReply::NotFound => Ok(AssignmentOutcome::NotFound),
            reply => Err(unexpected("assign_vehicle", reply)),
        }
    }

    pub async fn start(&self, ride_id: RideId) -> Result<TransitionOutcome, RideError> {
        let reply = self.directory.send(RideCommand::StartRide { ride_id }).await?;
        transition("start", reply, RideReply::Started)
    }

    pub async fn complete(&self, ride_id: RideId) -> Result<TransitionOutcome, RideError> {
        let reply = self.directory.send(RideCommand::CompleteRide { ride_id }).await?;
        transition("complete", reply, RideReply::Completed)
    }

    pub async fn cancel(&self, ride_id: RideId, reason: Option<String>) -> Result<TransitionOutcome, RideError> {
        let reply = self.directory.send(RideCommand::CancelRide { ride_id, reason }).await?;
        transition("cancel", reply, RideReply::Cancelled)
    }

    /// Current ride state, `None` if it was never booked.
    pub async fn get(&self, ride_id: RideId) -> Result<Option<Ride>, RideError> {
        match self.directory.send(RideCommand::GetRide { ride_id }).await? {
            RideReply::Ride(ride) => Ok(Some(*ride)),
            RideReply::NotFound => Ok(None),
            reply => Err(unexpected("get", reply)),
        }
    }
}

fn transition(operation: &'static str, reply: RideReply, success: RideReply) -> Result<TransitionOutcome, RideError> {
    if reply == success {
        return Ok(TransitionOutcome::Done);
    }

    match reply {
        RideReply::NoVehicleAssigned => Ok(TransitionOutcome::NoVehicleAssigned),
        RideReply::NotStarted => Ok(TransitionOutcome::NotStarted),
        RideReply::AlreadyStarted => Ok(TransitionOutcome::AlreadyStarted),
        RideReply::RideFinished(status) => Ok(TransitionOutcome::Finished(status)),
        RideReply::NotFound => Ok(TransitionOutcome::NotFound),
        reply => Err(unexpected(operation, reply)),
    }
}

fn unexpected(operation: &'static str, reply: RideReply) -> RideError {
    tracing::error!(operation = operation, reply = ?reply, "Unexpected ride reply");
    RideError::UnexpectedReply { operation, reply }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_maps_success_reply() {
        assert_eq!(
            transition("start", RideReply::Started, RideReply::Started).unwrap(),
            TransitionOutcome::Done
        );
        assert_eq!(
            transition("complete", RideReply::NotStarted, RideReply::Completed).unwrap(),
            TransitionOutcome::NotStarted
        );
    }

    #[test]
    fn test_transition_rejects_foreign_reply() {
        let err = transition("start", RideReply::Accepted, RideReply::Started).unwrap_err();
        assert!(matches!(err, RideError::UnexpectedReply { operation: "start", .. }));
    }

    #[test]
    fn test_success_reply_of_other_operation_is_unexpected() {
        // Completed is only a success for complete(); start() must not treat it as one.
        let err = transition("start", RideReply::Completed, RideReply::Started).unwrap_err();
        assert!(matches!(err, RideError::UnexpectedReply { .. }));
    }
}
