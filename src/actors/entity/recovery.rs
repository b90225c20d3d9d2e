use futures_util::StreamExt;
use std::sync::Arc;

use super::engine::Engine;
use crate::error::{EntityError, RecoveryError};
use crate::event_sourcing::core::{stream_key, Behavior};
use crate::event_sourcing::store::{EventLog, LogError};
use crate::metrics::Metrics;
use crate::utils::{Backoff, RestartDecision, RestartPolicy};

// ============================================================================
// Recovery Supervisor - Replay and restart-with-backoff
// ============================================================================
//
// Two jobs:
// - recover():  rebuild an engine by replaying its whole stream from offset 0
//               through the same appliers live processing uses. Any read
//               error discards the partially rebuilt engine.
// - restart():  after a persist failure, wait out the backoff schedule and
//               recover again. A failed recovery consumes another attempt.
//               Once the budget is spent the entity is fail-stopped.
//
// ============================================================================

/// Rebuild an engine from its event stream.
pub async fn recover<B: Behavior>(
    id: B::Id,
    log: &dyn EventLog<B::Event>,
) -> Result<Engine<B>, RecoveryError> {
    let stream = stream_key(B::ENTITY_TYPE, &id);

    let mut events = log
        .read_all(&stream)
        .await
        .map_err(|source| RecoveryError::Unreadable {
            stream: stream.clone(),
            source,
        })?;

    let mut engine = Engine::<B>::new(id);
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => engine.replay(&event),
            Err(source) => {
                return Err(RecoveryError::Interrupted {
                    stream,
                    replayed: engine.version(),
                    source,
                })
            }
        }
    }

    if engine.version() > 0 && !engine.state().is_initialized() {
        tracing::error!(
            entity = %stream,
            event_count = engine.version(),
            "Replayed events did not initialize state; entity stays uninitialized"
        );
    }

    tracing::debug!(entity = %stream, event_count = engine.version(), "Recovered entity");

    Ok(engine)
}

/// Per-entity restart bookkeeping, owned by the entity's actor.
pub struct RecoverySupervisor<B: Behavior> {
    log: Arc<dyn EventLog<B::Event>>,
    backoff: Backoff,
    metrics: Arc<Metrics>,
}

impl<B: Behavior> RecoverySupervisor<B> {
    pub fn new(log: Arc<dyn EventLog<B::Event>>, policy: RestartPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            log,
            backoff: policy.backoff(),
            metrics,
        }
    }

    pub fn log(&self) -> &dyn EventLog<B::Event> {
        self.log.as_ref()
    }

    /// Consecutive restarts since the last successful command.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// A command went through; the next failure starts a fresh schedule.
    pub fn succeeded(&mut self) {
        self.backoff.reset();
    }

    /// Restart after a persist failure.
    ///
    /// Returns a freshly recovered engine, or `PermanentlyFailed` once the
    /// restart budget is exhausted.
    pub async fn restart(&mut self, id: &B::Id, cause: &LogError) -> Result<Engine<B>, EntityError> {
        let entity = stream_key(B::ENTITY_TYPE, id);
        tracing::error!(entity = %entity, error = %cause, "Persist failed, restarting entity");

        loop {
            let decision = self.backoff.next(&mut rand::thread_rng());

            match decision {
                RestartDecision::RestartAfter { attempt, delay } => {
                    tracing::warn!(
                        entity = %entity,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Restarting entity after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    self.metrics.record_restart(B::ENTITY_TYPE);

                    match recover::<B>(id.clone(), self.log.as_ref()).await {
                        Ok(engine) => {
                            tracing::info!(
                                entity = %entity,
                                attempt = attempt,
                                version = engine.version(),
                                "Entity restarted"
                            );
                            return Ok(engine);
                        }
                        Err(e) => {
                            tracing::error!(
                                entity = %entity,
                                attempt = attempt,
                                error = %e,
                                "Replay during restart failed"
                            );
                            self.metrics.record_recovery_failure(B::ENTITY_TYPE);
                        }
                    }
                }
                RestartDecision::GiveUp { attempts } => {
                    tracing::error!(
                        entity = %entity,
                        attempts = attempts,
                        "Restart budget exhausted, entity permanently failed"
                    );
                    self.metrics.record_permanent_failure(B::ENTITY_TYPE);
                    return Err(EntityError::PermanentlyFailed { entity, attempts });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::behavior::tests::{added, opened, Counter, CounterEvent};
    use crate::event_sourcing::core::EntityState;
    use crate::event_sourcing::store::MemoryEventLog;
    use std::time::Duration;

    fn quick_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_restarts,
        }
    }

    async fn seeded_log() -> Arc<MemoryEventLog<CounterEvent>> {
        let log = Arc::new(MemoryEventLog::new());
        log.append("Counter-1", 0, &[opened(1), added(1, 4), added(1, 6)])
            .await
            .unwrap();
        log
    }

    #[tokio::test]
    async fn test_recover_replays_full_stream() {
        let log = seeded_log().await;

        let engine = recover::<Counter>(1, log.as_ref()).await.unwrap();

        assert_eq!(engine.state(), &EntityState::Initialized(10));
        assert_eq!(engine.version(), 3);
    }

    #[tokio::test]
    async fn test_recover_empty_stream_is_uninitialized() {
        let log = MemoryEventLog::<CounterEvent>::new();

        let engine = recover::<Counter>(2, &log).await.unwrap();

        assert!(!engine.state().is_initialized());
        assert_eq!(engine.version(), 0);
    }

    #[tokio::test]
    async fn test_recover_unreadable_stream() {
        let log = seeded_log().await;
        log.fail_reads(true);

        let err = recover::<Counter>(1, log.as_ref()).await.err().unwrap();

        assert!(matches!(err, RecoveryError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_recover_corrupt_stream_discards_partial_state() {
        let log = seeded_log().await;
        log.corrupt("Counter-1", 2);

        let err = recover::<Counter>(1, log.as_ref()).await.err().unwrap();

        match err {
            RecoveryError::Interrupted { replayed, .. } => assert_eq!(replayed, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_restart_recovers_after_backoff() {
        let log = seeded_log().await;
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut supervisor = RecoverySupervisor::<Counter>::new(log.clone(), quick_policy(3), metrics.clone());

        let cause = LogError::Unavailable("blip".to_string());
        let engine = supervisor.restart(&1, &cause).await.unwrap();

        assert_eq!(engine.state(), &EntityState::Initialized(10));
        assert_eq!(supervisor.attempts(), 1);
        assert_eq!(metrics.restarts_total.with_label_values(&["Counter"]).get(), 1);

        supervisor.succeeded();
        assert_eq!(supervisor.attempts(), 0);
    }

    #[tokio::test]
    async fn test_restart_gives_up_when_replay_keeps_failing() {
        let log = seeded_log().await;
        log.fail_reads(true);
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut supervisor = RecoverySupervisor::<Counter>::new(log.clone(), quick_policy(2), metrics.clone());

        let cause = LogError::Unavailable("down".to_string());
        let err = supervisor.restart(&1, &cause).await.err().unwrap();

        assert!(matches!(err, EntityError::PermanentlyFailed { attempts: 2, .. }));
        assert_eq!(log.read_count(), 2);
        assert_eq!(metrics.permanent_failures.with_label_values(&["Counter"]).get(), 1);
    }
}
