use kameo::actor::ActorRef;
use kameo::error::SendError;
use kameo::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use super::core::{ComponentHealth, HealthCheckable, HealthStatus};
use super::entity::{recover, Activity, Deliver, EntityActor, EntitySnapshot, InFlight, Inspect, RecoverySupervisor};
use crate::cluster::{LocalPlacement, Placement};
use crate::config::DirectoryConfig;
use crate::error::EntityError;
use crate::event_sourcing::core::{stream_key, Behavior, EntityCommand};
use crate::event_sourcing::store::EventLog;
use crate::metrics::Metrics;

// ============================================================================
// Entity Directory - Identity-addressed routing and activation
// ============================================================================
//
// Owns the id → live entity registry for one entity type on this node.
//
// Flow for send(command):
// 1. Ask placement who owns the entity; refuse if it is another node
// 2. Check out the registry slot (marks a command in flight)
// 3. Activate on first use: replay the stream, spawn the actor. The slot's
//    OnceCell makes concurrent activations converge on one actor
// 4. Ask the actor; its reply arrives only after persistence
//
// The caller waits under the configured ask timeout. The in-flight mark
// rides inside the Deliver message, so it outlives a caller that times out
// and is released only when the actor is done with the command.
//
// Passivation retires a slot, removes it and waits for its actor to stop.
// It never touches a slot with a command in flight, and it never touches a
// fail-stopped entity; those stay put until reactivate() is called. A
// retired slot admits no further commands, so stale handles cannot reach
// an actor that is shutting down.
//
// ============================================================================

type Reply<B> = <<B as Behavior>::Command as EntityCommand>::Reply;

struct Slot<B: Behavior> {
    actor: OnceCell<ActorRef<EntityActor<B>>>,
    activity: Arc<Activity>,
    failed: Arc<AtomicBool>,
}

impl<B: Behavior> Slot<B> {
    fn new() -> Self {
        Self {
            actor: OnceCell::new(),
            activity: Activity::new(),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn is_dead(&self) -> bool {
        self.actor.get().is_some_and(|actor| !actor.is_alive())
    }
}

/// Why an actor is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Passivation,
    Reactivation,
}

struct DirectoryInner<B: Behavior> {
    log: Arc<dyn EventLog<B::Event>>,
    placement: Arc<dyn Placement>,
    config: DirectoryConfig,
    metrics: Arc<Metrics>,
    entries: Mutex<HashMap<B::Id, Arc<Slot<B>>>>,
}

/// Registry and router for every entity of type `B` hosted on this node.
pub struct EntityDirectory<B: Behavior> {
    inner: Arc<DirectoryInner<B>>,
}

impl<B: Behavior> Clone for EntityDirectory<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Behavior> EntityDirectory<B> {
    pub fn new(
        log: Arc<dyn EventLog<B::Event>>,
        placement: Arc<dyn Placement>,
        config: DirectoryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                log,
                placement,
                config,
                metrics,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Single-node directory with default configuration and its own metrics registry.
    pub fn local(log: Arc<dyn EventLog<B::Event>>) -> anyhow::Result<Self> {
        let config = DirectoryConfig::default();
        let placement = Arc::new(LocalPlacement::new(config.node_id.clone()));
        Ok(Self::new(log, placement, config, Arc::new(Metrics::new()?)))
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Handle to the live entity for `id`, activating it if needed.
    ///
    /// Concurrent calls for the same id return handles to the same actor.
    /// A handle goes stale once its entity is passivated; its calls then
    /// fail with `Unavailable` and the caller should resolve again.
    pub async fn resolve(&self, id: B::Id) -> Result<EntityRef<B>, EntityError> {
        let entity = stream_key(B::ENTITY_TYPE, &id);
        let timeout = self.inner.config.ask_timeout;

        tokio::time::timeout(timeout, async {
            self.check_placement(&id, &entity).await?;
            let (slot, _in_flight) = self.checkout(&id, &entity)?;
            let actor = self.activate(&id, &entity, &slot).await?;
            Ok::<_, EntityError>(EntityRef {
                id: id.clone(),
                entity: entity.clone(),
                actor,
                slot,
                ask_timeout: timeout,
            })
        })
        .await
        .map_err(|_| EntityError::Timeout { entity: entity.clone() })?
    }

    /// Route a command to its entity and wait for the reply.
    ///
    /// The reply is only produced after the command's events are persisted.
    /// On `Timeout` the command may still complete later, and the entity
    /// counts as busy until it does.
    pub async fn send(&self, command: B::Command) -> Result<Reply<B>, EntityError> {
        let id = command.entity_id().clone();
        let entity = stream_key(B::ENTITY_TYPE, &id);

        tokio::time::timeout(self.inner.config.ask_timeout, async {
            self.check_placement(&id, &entity).await?;
            let (slot, in_flight) = self.checkout(&id, &entity)?;
            let actor = self.activate(&id, &entity, &slot).await?;
            deliver(&actor, Deliver::tracked(command, in_flight), &entity).await
        })
        .await
        .map_err(|_| {
            tracing::warn!(entity = %entity, "Timed out waiting for entity reply");
            EntityError::Timeout { entity: entity.clone() }
        })?
    }

    /// Passivate one entity now.
    ///
    /// Returns `Ok(false)` if it was not active or is fail-stopped, and
    /// `Busy` if a command is in flight.
    pub async fn passivate(&self, id: &B::Id) -> Result<bool, EntityError> {
        let slot = {
            let mut entries = self.entries();
            match entries.get(id) {
                None => return Ok(false),
                Some(slot) if slot.is_failed() => return Ok(false),
                Some(slot) if !slot.activity.retire_if_idle() => {
                    return Err(EntityError::Busy {
                        entity: stream_key(B::ENTITY_TYPE, id),
                    })
                }
                Some(_) => entries.remove(id),
            }
        };

        match slot {
            Some(slot) => Ok(self.stop(id, &slot, StopReason::Passivation).await),
            None => Ok(false),
        }
    }

    /// Passivate every entity idle for longer than the idle timeout.
    ///
    /// Returns the number of actors stopped.
    pub async fn passivate_idle(&self) -> usize {
        let Some(idle_timeout) = self.inner.config.idle_timeout else {
            return 0;
        };
        let now = Instant::now();

        let idle: Vec<(B::Id, Arc<Slot<B>>)> = {
            let mut entries = self.entries();
            let ids: Vec<B::Id> = entries
                .iter()
                .filter(|(_, slot)| {
                    !slot.is_failed()
                        && slot.activity.idle_for(now) >= idle_timeout
                        && slot.activity.retire_if_idle()
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        let mut stopped = 0;
        for (id, slot) in idle {
            if self.stop(&id, &slot, StopReason::Passivation).await {
                stopped += 1;
            }
        }

        if stopped > 0 {
            tracing::debug!(entity_type = B::ENTITY_TYPE, count = stopped, "Passivated idle entities");
        }
        stopped
    }

    /// Run `passivate_idle` every `passivation_interval` until the directory is dropped.
    ///
    /// Returns `None` when passivation is disabled.
    pub fn spawn_passivation(&self) -> Option<JoinHandle<()>> {
        self.inner.config.idle_timeout?;
        let interval = self.inner.config.passivation_interval;
        let weak = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                EntityDirectory { inner }.passivate_idle().await;
            }
            tracing::debug!(entity_type = B::ENTITY_TYPE, "Passivation sweeper stopped");
        }))
    }

    /// Bring a fail-stopped entity back: drop its actor and replay its stream again.
    ///
    /// For an entity that is not failed this is the same as `resolve`.
    pub async fn reactivate(&self, id: B::Id) -> Result<EntityRef<B>, EntityError> {
        let failed = {
            let mut entries = self.entries();
            match entries.get(&id) {
                Some(slot) if slot.is_failed() => {
                    // A fail-stopped actor rejects everything, so commands
                    // still queued on it cannot write.
                    slot.activity.retire_if_idle();
                    entries.remove(&id)
                }
                _ => None,
            }
        };

        if let Some(slot) = failed {
            tracing::info!(entity = %stream_key(B::ENTITY_TYPE, &id), "Reactivating failed entity");
            self.stop(&id, &slot, StopReason::Reactivation).await;
        }

        self.resolve(id).await
    }

    /// Number of entities with a running actor.
    pub fn active_count(&self) -> usize {
        self.entries()
            .values()
            .filter(|slot| slot.actor.get().is_some_and(|actor| actor.is_alive()))
            .count()
    }

    pub fn is_failed(&self, id: &B::Id) -> bool {
        self.entries().get(id).is_some_and(|slot| slot.is_failed())
    }

    fn failed_entities(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|(_, slot)| slot.is_failed())
            .map(|(id, _)| stream_key(B::ENTITY_TYPE, id))
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn entries(&self) -> MutexGuard<'_, HashMap<B::Id, Arc<Slot<B>>>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn check_placement(&self, id: &B::Id, entity: &str) -> Result<(), EntityError> {
        let owner = self
            .inner
            .placement
            .locate(entity)
            .await
            .map_err(|e| EntityError::Placement {
                entity: entity.to_string(),
                reason: e.to_string(),
            })?;

        if owner != self.inner.config.node_id {
            tracing::warn!(
                entity = %entity,
                entity_id = %id,
                owner = %owner,
                node = %self.inner.config.node_id,
                "Entity is owned by another node"
            );
            return Err(EntityError::Misrouted {
                entity: entity.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(())
    }

    /// Registry slot for `id`, created on first use. The in-flight mark is
    /// taken under the registry lock so passivation cannot race it.
    fn checkout(&self, id: &B::Id, entity: &str) -> Result<(Arc<Slot<B>>, InFlight), EntityError> {
        let mut entries = self.entries();

        if entries.get(id).is_some_and(|slot| slot.is_dead() && !slot.is_failed()) {
            tracing::warn!(entity = %stream_key(B::ENTITY_TYPE, id), "Replacing stopped entity actor");
            entries.remove(id);
            self.inner
                .metrics
                .active_entities
                .with_label_values(&[B::ENTITY_TYPE])
                .dec();
        }

        let slot = entries
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone();

        // Retired slots leave the registry under this lock, so this only
        // fails if that invariant is broken.
        let in_flight = slot.activity.enter().ok_or_else(|| EntityError::Unavailable {
            entity: entity.to_string(),
        })?;
        Ok((slot, in_flight))
    }

    async fn activate(
        &self,
        id: &B::Id,
        entity: &str,
        slot: &Slot<B>,
    ) -> Result<ActorRef<EntityActor<B>>, EntityError> {
        let inner = &self.inner;

        slot.actor
            .get_or_try_init(|| async move {
                let engine = recover::<B>(id.clone(), inner.log.as_ref())
                    .await
                    .map_err(|source| {
                        tracing::error!(entity = %entity, error = %source, "Entity recovery failed");
                        inner.metrics.record_recovery_failure(B::ENTITY_TYPE);
                        EntityError::Recovery {
                            entity: entity.to_string(),
                            source,
                        }
                    })?;

                let supervisor =
                    RecoverySupervisor::<B>::new(inner.log.clone(), inner.config.restart.clone(), inner.metrics.clone());
                let actor = EntityActor::spawn(EntityActor::new(
                    engine,
                    supervisor,
                    inner.metrics.clone(),
                    slot.failed.clone(),
                ));
                inner.metrics.record_activation(B::ENTITY_TYPE);

                Ok::<_, EntityError>(actor)
            })
            .await
            .cloned()
    }

    /// Stop a slot's actor and wait for it to shut down. Returns whether an actor was running.
    async fn stop(&self, id: &B::Id, slot: &Slot<B>, reason: StopReason) -> bool {
        let Some(actor) = slot.actor.get() else {
            return false;
        };
        let entity = stream_key(B::ENTITY_TYPE, id);

        if let Err(e) = actor.stop_gracefully().await {
            tracing::debug!(entity = %entity, error = ?e, "Actor already stopped");
        }
        actor.wait_for_shutdown().await;

        match reason {
            StopReason::Passivation => {
                self.inner.metrics.record_passivation(B::ENTITY_TYPE);
                tracing::info!(entity = %entity, "Entity passivated");
            }
            StopReason::Reactivation => {
                self.inner.metrics.record_reactivation(B::ENTITY_TYPE);
                tracing::debug!(entity = %entity, "Stopped fail-stopped actor");
            }
        }
        true
    }
}

async fn deliver<B: Behavior>(
    actor: &ActorRef<EntityActor<B>>,
    message: Deliver<B::Command>,
    entity: &str,
) -> Result<Reply<B>, EntityError> {
    match actor.ask(message).send().await {
        Ok(reply) => Ok(reply),
        Err(SendError::HandlerError(err)) => Err(err),
        Err(e) => {
            tracing::warn!(entity = %entity, error = ?e, "Entity actor unreachable");
            Err(EntityError::Unavailable {
                entity: entity.to_string(),
            })
        }
    }
}

impl<B: Behavior> HealthCheckable for EntityDirectory<B> {
    fn check_health(&self) -> ComponentHealth {
        let failed = self.failed_entities();
        if failed.is_empty() {
            ComponentHealth::new(self.component_name(), HealthStatus::Healthy)
                .with_details(format!("{} active", self.active_count()))
        } else {
            ComponentHealth::new(
                self.component_name(),
                HealthStatus::Degraded(format!("{} entities permanently failed", failed.len())),
            )
            .with_details(failed.join(", "))
        }
    }

    fn component_name(&self) -> &str {
        "entity_directory"
    }
}

// ============================================================================
// Entity Handle
// ============================================================================

/// Handle to one live entity, as returned by [`EntityDirectory::resolve`].
pub struct EntityRef<B: Behavior> {
    id: B::Id,
    entity: String,
    actor: ActorRef<EntityActor<B>>,
    slot: Arc<Slot<B>>,
    ask_timeout: Duration,
}

impl<B: Behavior> Clone for EntityRef<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            entity: self.entity.clone(),
            actor: self.actor.clone(),
            slot: self.slot.clone(),
            ask_timeout: self.ask_timeout,
        }
    }
}

impl<B: Behavior> EntityRef<B> {
    pub fn id(&self) -> &B::Id {
        &self.id
    }

    pub fn actor(&self) -> &ActorRef<EntityActor<B>> {
        &self.actor
    }

    /// Send a command addressed to this entity.
    ///
    /// Fails with `Unavailable` once the entity has been passivated.
    pub async fn send(&self, command: B::Command) -> Result<Reply<B>, EntityError> {
        debug_assert_eq!(command.entity_id(), &self.id, "command sent to the wrong entity handle");

        let in_flight = self.slot.activity.enter().ok_or_else(|| EntityError::Unavailable {
            entity: self.entity.clone(),
        })?;
        let message = Deliver::tracked(command, in_flight);
        tokio::time::timeout(self.ask_timeout, deliver(&self.actor, message, &self.entity))
            .await
            .map_err(|_| EntityError::Timeout {
                entity: self.entity.clone(),
            })?
    }

    /// Current state, version and failure flag of the entity.
    pub async fn inspect(&self) -> Result<EntitySnapshot<B::Id, B::State>, EntityError> {
        self.actor
            .ask(Inspect)
            .send()
            .await
            .map_err(|_| EntityError::Unavailable {
                entity: self.entity.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NodeId, PlacementError, RendezvousPlacement};
    use crate::event_sourcing::core::behavior::tests::{Counter, CounterCommand, CounterEvent, CounterReply};
    use crate::event_sourcing::core::EntityState;
    use crate::event_sourcing::store::MemoryEventLog;
    use crate::utils::RestartPolicy;
    use async_trait::async_trait;

    fn test_config() -> DirectoryConfig {
        DirectoryConfig {
            ask_timeout: Duration::from_secs(2),
            idle_timeout: Some(Duration::ZERO),
            passivation_interval: Duration::from_millis(10),
            restart: RestartPolicy {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_restarts: 2,
            },
            ..DirectoryConfig::default()
        }
    }

    fn directory(log: Arc<MemoryEventLog<CounterEvent>>, config: DirectoryConfig) -> EntityDirectory<Counter> {
        let placement = Arc::new(LocalPlacement::new(config.node_id.clone()));
        EntityDirectory::<Counter>::new(log, placement, config, Arc::new(Metrics::new().unwrap()))
    }

    // Short caller timeout, long restart backoff: a failed append outlives the caller.
    fn slow_restart_config() -> DirectoryConfig {
        DirectoryConfig {
            ask_timeout: Duration::from_millis(50),
            restart: RestartPolicy {
                initial_delay: Duration::from_millis(300),
                max_delay: Duration::from_millis(300),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_restarts: 3,
            },
            ..test_config()
        }
    }

    struct SlowPlacement;

    #[async_trait]
    impl Placement for SlowPlacement {
        async fn locate(&self, _key: &str) -> Result<NodeId, PlacementError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(NodeId::local())
        }
    }

    struct DownPlacement;

    #[async_trait]
    impl Placement for DownPlacement {
        async fn locate(&self, _key: &str) -> Result<NodeId, PlacementError> {
            Err(PlacementError::Unavailable("membership service down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolve_activates_once() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dir = dir.clone();
            handles.push(tokio::spawn(async move { dir.resolve(1).await.unwrap() }));
        }
        let mut refs = Vec::new();
        for handle in handles {
            refs.push(handle.await.unwrap());
        }

        let first = refs[0].actor().id();
        assert!(refs.iter().all(|r| r.actor().id() == first));
        assert_eq!(log.read_count(), 1);
        assert_eq!(dir.active_count(), 1);
        assert_eq!(dir.metrics().activations_total.with_label_values(&["Counter"]).get(), 1);
    }

    #[tokio::test]
    async fn test_send_routes_by_entity_id() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());

        dir.send(CounterCommand::Open(1)).await.unwrap();
        dir.send(CounterCommand::Open(2)).await.unwrap();
        dir.send(CounterCommand::Add(2, 9)).await.unwrap();

        assert_eq!(dir.send(CounterCommand::Read(1)).await.unwrap(), CounterReply::Value(0));
        assert_eq!(dir.send(CounterCommand::Read(2)).await.unwrap(), CounterReply::Value(9));
        assert_eq!(dir.active_count(), 2);
    }

    #[tokio::test]
    async fn test_recovery_failure_is_surfaced_then_retried() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());

        log.fail_reads(true);
        let err = dir.send(CounterCommand::Open(1)).await.unwrap_err();
        assert!(matches!(err, EntityError::Recovery { .. }));
        assert_eq!(dir.active_count(), 0);

        log.fail_reads(false);
        assert_eq!(dir.send(CounterCommand::Open(1)).await.unwrap(), CounterReply::Missing);
        assert_eq!(dir.active_count(), 1);
    }

    #[tokio::test]
    async fn test_passivate_refuses_entity_in_flight() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());
        dir.send(CounterCommand::Open(1)).await.unwrap();

        let (_slot, guard) = dir.checkout(&1, "Counter-1").unwrap();
        assert!(matches!(dir.passivate(&1).await, Err(EntityError::Busy { .. })));
        assert_eq!(dir.passivate_idle().await, 0);

        drop(guard);
        assert!(dir.passivate(&1).await.unwrap());
        assert_eq!(dir.active_count(), 0);
    }

    #[tokio::test]
    async fn test_passivated_entity_is_recovered_on_next_command() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());
        dir.send(CounterCommand::Open(1)).await.unwrap();
        dir.send(CounterCommand::Add(1, 4)).await.unwrap();

        assert_eq!(dir.passivate_idle().await, 1);
        assert_eq!(dir.active_count(), 0);

        assert_eq!(dir.send(CounterCommand::Read(1)).await.unwrap(), CounterReply::Value(4));
        assert_eq!(log.read_count(), 2);
        assert_eq!(dir.metrics().passivations_total.with_label_values(&["Counter"]).get(), 1);
    }

    #[tokio::test]
    async fn test_background_sweeper_passivates() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());
        let sweeper = dir.spawn_passivation().unwrap();

        dir.send(CounterCommand::Open(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(dir.active_count(), 0);
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_no_sweeper_without_idle_timeout() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let config = DirectoryConfig {
            idle_timeout: None,
            ..test_config()
        };
        let dir = directory(log, config);

        assert!(dir.spawn_passivation().is_none());
        assert_eq!(dir.passivate_idle().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_and_reactivation() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), test_config());
        dir.send(CounterCommand::Open(1)).await.unwrap();

        log.fail_next_appends(10);
        let err = dir.send(CounterCommand::Add(1, 1)).await.unwrap_err();
        assert!(matches!(err, EntityError::PermanentlyFailed { .. }));
        assert!(dir.is_failed(&1));
        assert!(dir.check_health().status.is_degraded());

        // Fail-stopped entities are left alone by passivation.
        assert_eq!(dir.passivate_idle().await, 0);
        assert!(!dir.passivate(&1).await.unwrap());

        log.fail_next_appends(0);
        let entity = dir.reactivate(1).await.unwrap();
        assert!(!dir.is_failed(&1));
        assert_eq!(entity.send(CounterCommand::Add(1, 2)).await.unwrap(), CounterReply::Value(0));

        let snapshot = entity.inspect().await.unwrap();
        assert_eq!(snapshot.state, EntityState::Initialized(2));
        assert!(dir.check_health().status.is_healthy());

        let metrics = dir.metrics();
        assert_eq!(metrics.reactivations_total.with_label_values(&["Counter"]).get(), 1);
        assert_eq!(metrics.passivations_total.with_label_values(&["Counter"]).get(), 0);
        assert_eq!(metrics.active_entities.with_label_values(&["Counter"]).get(), 1);
    }

    #[tokio::test]
    async fn test_misrouted_command_is_rejected() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let placement = RendezvousPlacement::new([NodeId::new("a"), NodeId::new("b")]);
        let owner = placement.owner("Counter-1").cloned().unwrap();
        let other = if owner == NodeId::new("a") { NodeId::new("b") } else { NodeId::new("a") };

        let config = DirectoryConfig {
            node_id: other,
            ..test_config()
        };
        let dir = EntityDirectory::<Counter>::new(log.clone(), Arc::new(placement), config, Arc::new(Metrics::new().unwrap()));

        let err = dir.send(CounterCommand::Open(1)).await.unwrap_err();
        match err {
            EntityError::Misrouted { owner: reported, .. } => assert_eq!(reported, owner.to_string()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(log.read_count(), 0);
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let config = DirectoryConfig {
            ask_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let dir = EntityDirectory::<Counter>::new(log, Arc::new(SlowPlacement), config, Arc::new(Metrics::new().unwrap()));

        let err = dir.send(CounterCommand::Open(1)).await.unwrap_err();
        assert!(matches!(err, EntityError::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_placement_outage_is_reported() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = EntityDirectory::<Counter>::new(log.clone(), Arc::new(DownPlacement), test_config(), Arc::new(Metrics::new().unwrap()));

        let err = dir.send(CounterCommand::Open(1)).await.unwrap_err();
        match err {
            EntityError::Placement { reason, .. } => assert!(reason.contains("membership service down")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(log.read_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_command_still_completes() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), slow_restart_config());
        dir.send(CounterCommand::Open(1)).await.unwrap();

        log.fail_next_appends(1);
        let err = dir.send(CounterCommand::Add(1, 5)).await.unwrap_err();
        assert!(matches!(err, EntityError::Timeout { .. }));
        assert_eq!(log.events("Counter-1").len(), 1);

        // The actor retries after its backoff, with nobody waiting.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(log.events("Counter-1").len(), 2);
        assert_eq!(dir.send(CounterCommand::Read(1)).await.unwrap(), CounterReply::Value(5));
    }

    #[tokio::test]
    async fn test_passivation_waits_for_timed_out_command() {
        let log = Arc::new(MemoryEventLog::<CounterEvent>::new());
        let dir = directory(log.clone(), slow_restart_config());
        dir.send(CounterCommand::Open(1)).await.unwrap();
        let original = dir.resolve(1).await.unwrap();

        log.fail_next_appends(1);
        let err = dir.send(CounterCommand::Add(1, 5)).await.unwrap_err();
        assert!(matches!(err, EntityError::Timeout { .. }));

        // The caller is gone but the command is still running.
        assert!(matches!(dir.passivate(&1).await, Err(EntityError::Busy { .. })));
        assert_eq!(dir.passivate_idle().await, 0);
        let again = dir.resolve(1).await.unwrap();
        assert_eq!(again.actor().id(), original.actor().id());
        assert_eq!(log.read_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(dir.passivate(&1).await.unwrap());
        assert!(!original.actor().is_alive());

        // Stale handles are turned away instead of reaching the stopped actor.
        let stale = original.send(CounterCommand::Add(1, 1)).await.unwrap_err();
        assert!(matches!(stale, EntityError::Unavailable { .. }));

        let fresh = dir.resolve(1).await.unwrap();
        assert_ne!(fresh.actor().id(), original.actor().id());
        let snapshot = fresh.inspect().await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.state, EntityState::Initialized(5));
        assert_eq!(log.events("Counter-1").len(), 2);
    }
}
