use async_trait::async_trait;
use futures_util::stream::BoxStream;

// ============================================================================
// Event Log - Contract of the durable append-only persistence backend
// ============================================================================
//
// The runtime never stores anything itself. It talks to an EventLog that:
// 1. Appends a batch of events to one stream, atomically, in order
// 2. Rejects the append if the stream moved past the expected version
//    (single writer per stream, even during placement rebalancing)
// 3. Streams back the full history of one stream from offset 0
//
// ============================================================================

/// Failure reported by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("concurrency conflict on {stream}: expected version {expected}, found {actual}")]
    Conflict {
        stream: String,
        expected: u64,
        actual: u64,
    },

    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt event in {stream} at position {position}: {reason}")]
    Corrupt {
        stream: String,
        position: u64,
        reason: String,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Ordered, finite stream of a single entity's events.
pub type EventStream<'a, E> = BoxStream<'a, Result<E, LogError>>;

/// Durable append-only event log, shared by every engine of one entity type.
#[async_trait]
pub trait EventLog<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Append `events` after `expected_version` events already in `stream`.
    ///
    /// Returns the new stream version (number of events in the stream).
    async fn append(&self, stream: &str, expected_version: u64, events: &[E]) -> Result<u64, LogError>;

    /// Read the whole stream in append order.
    ///
    /// The stream cannot be resumed mid-way; callers that fail part way
    /// must start over from the beginning.
    async fn read_all(&self, stream: &str) -> Result<EventStream<'static, E>, LogError>;
}
