// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Generic, reusable types shared by the runtime's components.
//
// ============================================================================

pub mod health;

pub use health::*;
