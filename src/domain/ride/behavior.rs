use chrono::Utc;

use super::commands::{RideCommand, RideReply};
use super::events::*;
use super::value_objects::{Ride, RideId, RideStatus};
use crate::event_sourcing::core::{Behavior, EntityCommand, EntityEvent};

// ============================================================================
// Ride Behavior - Domain Logic
// ============================================================================
//
// A command is accepted exactly when its reply against the current state is
// the success reply; the event it emits is derived from that same decision,
// so replies and persisted facts never disagree.
//
// ============================================================================

pub struct RideBehavior;

impl Behavior for RideBehavior {
    type Id = RideId;
    type State = Ride;
    type Event = RideEvent;
    type Command = RideCommand;

    const ENTITY_TYPE: &'static str = "Ride";

    fn process_initial_command(command: &RideCommand) -> Vec<RideEvent> {
        match command {
            RideCommand::Book {
                ride_id,
                origin,
                destination,
                pickup_time,
            } if command.booking_problem().is_none() => vec![RideEvent::Booked(RideBooked {
                ride_id: *ride_id,
                origin: origin.clone(),
                destination: destination.clone(),
                pickup_time: *pickup_time,
                occurred_at: Utc::now(),
            })],
            _ => vec![],
        }
    }

    fn process_command(ride: &Ride, command: &RideCommand) -> Vec<RideEvent> {
        let ride_id = ride.id;
        let occurred_at = Utc::now();

        match (command, command.initialized_reply(ride)) {
            (RideCommand::AssignVehicle { vehicle, .. }, RideReply::AssignmentReceived) => {
                vec![RideEvent::VehicleAssigned(VehicleAssigned {
                    ride_id,
                    vehicle: vehicle.clone(),
                    occurred_at,
                })]
            }
            (RideCommand::StartRide { .. }, RideReply::Started) => {
                vec![RideEvent::Started(RideStarted { ride_id, occurred_at })]
            }
            (RideCommand::CompleteRide { .. }, RideReply::Completed) => {
                vec![RideEvent::Completed(RideCompleted { ride_id, occurred_at })]
            }
            (RideCommand::CancelRide { reason, .. }, RideReply::Cancelled) => {
                vec![RideEvent::Cancelled(RideCancelled {
                    ride_id,
                    reason: reason.clone(),
                    occurred_at,
                })]
            }
            _ => vec![],
        }
    }

    fn apply_initial_event(event: &RideEvent) -> Option<Ride> {
        match event {
            RideEvent::Booked(e) => Some(Ride {
                id: e.ride_id,
                origin: e.origin.clone(),
                destination: e.destination.clone(),
                pickup_time: e.pickup_time,
                status: RideStatus::Pending,
                vehicle: None,
                cancel_reason: None,
                booked_at: e.occurred_at,
                updated_at: e.occurred_at,
            }),
            _ => None,
        }
    }

    fn apply_event(mut ride: Ride, event: &RideEvent) -> Ride {
        match event {
            RideEvent::Booked(_) => {
                // First event already applied
                return ride;
            }
            RideEvent::VehicleAssigned(e) => {
                ride.status = RideStatus::Assigned;
                ride.vehicle = Some(e.vehicle.clone());
            }
            RideEvent::Started(_) => {
                ride.status = RideStatus::InProgress;
            }
            RideEvent::Completed(_) => {
                ride.status = RideStatus::Completed;
            }
            RideEvent::Cancelled(e) => {
                ride.status = RideStatus::Cancelled;
                ride.cancel_reason = e.reason.clone();
            }
        }
        ride.updated_at = event.created_at();
        ride
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ride::value_objects::VehicleId;
    use crate::event_sourcing::core::{load_from_events, EntityState};

    fn book(ride_id: RideId) -> RideCommand {
        RideCommand::Book {
            ride_id,
            origin: "Central Station".to_string(),
            destination: "Airport".to_string(),
            pickup_time: Utc::now(),
        }
    }

    fn booked(ride_id: RideId) -> Ride {
        let events = RideBehavior::process_initial_command(&book(ride_id));
        RideBehavior::apply_initial_event(&events[0]).unwrap()
    }

    #[test]
    fn test_book_emits_booking_event() {
        let ride_id = RideId::new();
        let events = RideBehavior::process_initial_command(&book(ride_id));

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RideEvent::Booked(e) if e.ride_id == ride_id));
    }

    #[test]
    fn test_malformed_initial_commands_emit_nothing() {
        let ride_id = RideId::new();
        let invalid = RideCommand::Book {
            ride_id,
            origin: "A".to_string(),
            destination: "A".to_string(),
            pickup_time: Utc::now(),
        };

        assert!(RideBehavior::process_initial_command(&invalid).is_empty());
        assert!(RideBehavior::process_initial_command(&RideCommand::StartRide { ride_id }).is_empty());
    }

    #[test]
    fn test_booked_ride_is_pending_without_vehicle() {
        let ride = booked(RideId::new());
        assert_eq!(ride.status, RideStatus::Pending);
        assert_eq!(ride.vehicle, None);
    }

    #[test]
    fn test_duplicate_booking_emits_nothing() {
        let ride_id = RideId::new();
        let ride = booked(ride_id);
        assert!(RideBehavior::process_command(&ride, &book(ride_id)).is_empty());
    }

    #[test]
    fn test_second_assignment_emits_nothing() {
        let ride_id = RideId::new();
        let ride = booked(ride_id);
        let first = RideCommand::AssignVehicle {
            ride_id,
            vehicle: VehicleId::new("V1"),
        };
        let second = RideCommand::AssignVehicle {
            ride_id,
            vehicle: VehicleId::new("V2"),
        };

        let events = RideBehavior::process_command(&ride, &first);
        assert_eq!(events.len(), 1);
        let ride = RideBehavior::apply_event(ride, &events[0]);
        assert_eq!(ride.vehicle, Some(VehicleId::new("V1")));

        assert!(RideBehavior::process_command(&ride, &second).is_empty());
    }

    #[test]
    fn test_full_lifecycle_replays_to_completed() {
        let ride_id = RideId::new();
        let mut history = RideBehavior::process_initial_command(&book(ride_id));
        let mut ride = RideBehavior::apply_initial_event(&history[0]).unwrap();

        for command in [
            RideCommand::AssignVehicle {
                ride_id,
                vehicle: VehicleId::new("V1"),
            },
            RideCommand::StartRide { ride_id },
            RideCommand::CompleteRide { ride_id },
            RideCommand::CancelRide { ride_id, reason: None },
        ] {
            for event in RideBehavior::process_command(&ride, &command) {
                ride = RideBehavior::apply_event(ride, &event);
                history.push(event);
            }
        }

        assert_eq!(history.len(), 4);
        assert_eq!(ride.status, RideStatus::Completed);
        assert_eq!(
            load_from_events::<RideBehavior, _>(ride_id, &history),
            EntityState::Initialized(ride)
        );
    }

    #[test]
    fn test_cancel_records_reason() {
        let ride_id = RideId::new();
        let ride = booked(ride_id);
        let cancel = RideCommand::CancelRide {
            ride_id,
            reason: Some("passenger no-show".to_string()),
        };

        let events = RideBehavior::process_command(&ride, &cancel);
        let ride = RideBehavior::apply_event(ride, &events[0]);

        assert_eq!(ride.status, RideStatus::Cancelled);
        assert_eq!(ride.cancel_reason.as_deref(), Some("passenger no-show"));
    }
}
