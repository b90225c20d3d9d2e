use super::commands::RideReply;
use crate::error::EntityError;

// ============================================================================
// Ride Repository Errors
// ============================================================================
//
// Business rejections are not errors: they come back as outcome values.
// These are the cases where the caller got no usable answer.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RideError {
    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error("Unexpected reply to {operation}: {reply:?}")]
    UnexpectedReply {
        operation: &'static str,
        reply: RideReply,
    },
}
