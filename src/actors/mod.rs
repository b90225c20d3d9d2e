// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based runtime for virtual entities.
//
// Structure:
// - core/      - Abstract traits and types (HealthCheckable)
// - entity/    - Per-entity engine, recovery supervisor and kameo actor
// - directory  - Identity-addressed registry, activation and passivation
//
// Business rules live in Behavior implementations (see domain/); actors
// only sequence commands and talk to the event log.
//
// ============================================================================

pub mod core;
pub mod directory;
pub mod entity;

pub use self::core::{ComponentHealth, HealthCheckable, HealthStatus};
pub use directory::{EntityDirectory, EntityRef};
pub use entity::{Deliver, EntityActor, EntitySnapshot, Inspect};
