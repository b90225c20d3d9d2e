//! Error outcomes surfaced to callers of the entity directory.

use crate::event_sourcing::store::LogError;

/// Why an entity's history could not be replayed.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The stream could not be opened at all.
    #[error("cannot read stream {stream}: {source}")]
    Unreadable {
        stream: String,
        #[source]
        source: LogError,
    },

    /// The stream broke part way through the replay.
    #[error("replay of {stream} failed after {replayed} events: {source}")]
    Interrupted {
        stream: String,
        replayed: u64,
        #[source]
        source: LogError,
    },
}

/// Failure of a command sent through the directory.
///
/// A rejected business command is *not* an error: it comes back as a
/// normal reply value. Everything here means the caller got no reply.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// Activation failed because the entity history could not be replayed.
    #[error("activation of {entity} failed: {source}")]
    Recovery {
        entity: String,
        #[source]
        source: RecoveryError,
    },

    /// The entity exhausted its restart budget and stopped accepting commands.
    #[error("entity {entity} permanently failed after {attempts} restart attempts")]
    PermanentlyFailed { entity: String, attempts: u32 },

    /// Another node is authoritative for this entity.
    #[error("entity {entity} is owned by node {owner}")]
    Misrouted { entity: String, owner: String },

    /// The placement service could not answer.
    #[error("placement lookup for {entity} failed: {reason}")]
    Placement { entity: String, reason: String },

    /// No reply within the configured ask timeout.
    ///
    /// The command may still complete and persist after this is returned.
    #[error("timed out waiting for {entity}")]
    Timeout { entity: String },

    /// The entity's actor is not running (stopped or passivated mid-request).
    #[error("entity {entity} is unavailable")]
    Unavailable { entity: String },

    /// The entity has a command in flight and cannot be passivated.
    #[error("entity {entity} is busy")]
    Busy { entity: String },
}

impl EntityError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EntityError::Timeout { .. } | EntityError::Unavailable { .. } | EntityError::Busy { .. }
        )
    }
}
