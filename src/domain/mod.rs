// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Concrete entity types plugged into the runtime. Each entity type has its
// own subdirectory with:
// - Value objects
// - Events
// - Commands and replies
// - Behavior implementation
// - Repository facade
//
// This layer never touches actors or the event log directly.
//
// ============================================================================

pub mod ride;
