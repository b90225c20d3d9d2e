// ============================================================================
// Cluster Placement
// ============================================================================
//
// Interface to the external membership / consistent-hash service, plus the
// two implementations shipped with the crate.
//
// ============================================================================

mod placement;

pub use placement::{LocalPlacement, NodeId, Placement, PlacementError, RendezvousPlacement};
