use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::event_log::{EventLog, EventStream, LogError};

// ============================================================================
// In-Memory Event Log
// ============================================================================
//
// Process-local EventLog used by tests and the demo binary. Carries fault
// injection knobs so that persist and recovery failures can be exercised
// without a real database:
// - fail_next_appends(n): the next n appends fail as Unavailable
// - lose_next_acks(n):     the next n appends land, then report Unavailable
// - fail_reads(true):     every read_all fails as Unavailable
// - corrupt(stream, pos): reading `stream` yields Corrupt at `pos`
//
// ============================================================================

pub struct MemoryEventLog<E> {
    streams: Mutex<HashMap<String, Vec<E>>>,
    failing_appends: AtomicU32,
    lost_acks: AtomicU32,
    failing_reads: Mutex<bool>,
    corrupted: Mutex<HashSet<(String, u64)>>,
    appends: AtomicUsize,
    reads: AtomicUsize,
}

impl<E> Default for MemoryEventLog<E> {
    fn default() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            failing_appends: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            failing_reads: Mutex::new(false),
            corrupted: Mutex::new(HashSet::new()),
            appends: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone> MemoryEventLog<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Let the next `count` appends land but answer them with an error.
    pub fn lose_next_acks(&self, count: u32) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    /// Make every read fail until switched off again.
    pub fn fail_reads(&self, failing: bool) {
        if let Ok(mut flag) = self.failing_reads.lock() {
            *flag = failing;
        }
    }

    /// Report the event at `position` of `stream` as corrupt on read.
    pub fn corrupt(&self, stream: &str, position: u64) {
        if let Ok(mut corrupted) = self.corrupted.lock() {
            corrupted.insert((stream.to_string(), position));
        }
    }

    /// Copy of a stream's events, in append order.
    pub fn events(&self, stream: &str) -> Vec<E> {
        self.streams
            .lock()
            .map(|streams| streams.get(stream).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of successful append calls.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Number of read_all calls, successful or not.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_append_failure(&self) -> bool {
        take_one(&self.failing_appends)
    }

    fn take_lost_ack(&self) -> bool {
        take_one(&self.lost_acks)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn poisoned() -> LogError {
    LogError::Unavailable("memory log lock poisoned".to_string())
}

#[async_trait]
impl<E> EventLog<E> for MemoryEventLog<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn append(&self, stream: &str, expected_version: u64, events: &[E]) -> Result<u64, LogError> {
        if self.take_append_failure() {
            tracing::debug!(stream = %stream, "Injected append failure");
            return Err(LogError::Unavailable("injected append failure".to_string()));
        }

        let mut streams = self.streams.lock().map_err(|_| poisoned())?;
        let entries = streams.entry(stream.to_string()).or_default();

        let actual = entries.len() as u64;
        if actual != expected_version {
            return Err(LogError::Conflict {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        entries.extend_from_slice(events);
        self.appends.fetch_add(1, Ordering::SeqCst);

        if self.take_lost_ack() {
            tracing::debug!(stream = %stream, "Injected lost append acknowledgement");
            return Err(LogError::Unavailable("injected lost acknowledgement".to_string()));
        }

        Ok(entries.len() as u64)
    }

    async fn read_all(&self, stream: &str) -> Result<EventStream<'static, E>, LogError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if *self.failing_reads.lock().map_err(|_| poisoned())? {
            return Err(LogError::Unavailable("injected read failure".to_string()));
        }

        let events = self
            .streams
            .lock()
            .map_err(|_| poisoned())?
            .get(stream)
            .cloned()
            .unwrap_or_default();
        let corrupted = self.corrupted.lock().map_err(|_| poisoned())?.clone();
        let stream_name = stream.to_string();

        let items = events.into_iter().enumerate().map(move |(position, event)| {
            let position = position as u64;
            if corrupted.contains(&(stream_name.clone(), position)) {
                Err(LogError::Corrupt {
                    stream: stream_name.clone(),
                    position,
                    reason: "injected corruption".to_string(),
                })
            } else {
                Ok(event)
            }
        });

        Ok(stream::iter(items).boxed())
    }
}
