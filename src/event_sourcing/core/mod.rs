// ============================================================================
// Event Sourcing Core - Generic Entity Abstractions
// ============================================================================
//
// Contracts and plugin interface that work with ANY entity type.
//
// Key Principles:
// - No domain-specific code (no Ride, Vehicle, etc.)
// - Generic over entity types
// - Pure functions only, no I/O
//
// ============================================================================

pub mod behavior;
pub mod contract;

// Re-export core types for convenience
pub use behavior::{fold_event, load_from_events, Behavior, EntityState};
pub use contract::{stream_key, EntityCommand, EntityEvent, EntityId};
