// ============================================================================
// Entity Module - Engine, recovery and the per-entity actor
// ============================================================================

pub mod activity;
pub mod engine;
pub mod entity_actor;
pub mod recovery;

pub use activity::{Activity, InFlight};
pub use engine::{Engine, Handled};
pub use entity_actor::{Deliver, EntityActor, EntitySnapshot, Inspect};
pub use recovery::{recover, RecoverySupervisor};
