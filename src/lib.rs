// ============================================================================
// entity_runtime - Event-sourced virtual entities on kameo actors
// ============================================================================
//
// Layers, bottom-up:
// - event_sourcing/ - Entity contracts, Behavior plugins, event log backends
// - actors/         - Per-entity engine + actor, recovery, entity directory
// - cluster/        - Placement (which node owns an entity)
// - domain/         - Concrete entity types (Ride)
// - metrics/        - Prometheus metrics and the /metrics, /health server
//
// ============================================================================

pub mod actors;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;

pub use actors::{EntityDirectory, EntityRef};
pub use config::DirectoryConfig;
pub use error::{EntityError, RecoveryError};
