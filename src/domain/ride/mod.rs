// ============================================================================
// Ride Domain - Example entity type running on the runtime
// ============================================================================
//
// This module contains ALL Ride-specific code:
// - Value objects (RideId, VehicleId, RideStatus, Ride)
// - Events (RideBooked, VehicleAssigned, etc.)
// - Commands and replies (Book, AssignVehicle, etc.)
// - Behavior (RideBehavior, the four pure plugin functions)
// - Repository (RideRepository facade over the entity directory)
//
// ============================================================================

pub mod behavior;
pub mod commands;
pub mod errors;
pub mod events;
pub mod repository;
pub mod value_objects;

// Re-export for convenience
pub use behavior::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use repository::*;
pub use value_objects::*;
