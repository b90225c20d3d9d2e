// ============================================================================
// Event Sourcing Store - Persistence Backends
// ============================================================================
//
// The EventLog contract plus the backends shipped with the crate. All of
// them work with ANY event type.
//
// ============================================================================

pub mod event_log;
pub mod memory;
pub mod scylla_log;

pub use event_log::{EventLog, EventStream, LogError};
pub use memory::MemoryEventLog;
pub use scylla_log::ScyllaEventLog;
