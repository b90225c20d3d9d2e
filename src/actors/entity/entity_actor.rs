use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::activity::InFlight;
use super::engine::Engine;
use super::recovery::RecoverySupervisor;
use crate::error::EntityError;
use crate::event_sourcing::core::{Behavior, EntityCommand, EntityState};
use crate::metrics::Metrics;

// ============================================================================
// Entity Actor - One sequential worker per entity id
// ============================================================================
//
// Responsibilities:
// - Own the engine of exactly one entity
// - Handle commands one at a time, in mailbox order
// - Hold the reply until the events are durably appended
// - On persist failure, restart through the recovery supervisor and retry
//   the same command against the replayed state
// - Fail-stop once the restart budget is exhausted
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

/// Command envelope. The ask reply is the single-use reply channel.
///
/// A tracked envelope carries the entity's in-flight mark, which is released
/// only when the handler is done with the command, whether or not the
/// caller is still waiting.
///
/// After a failed append the command is decided again against the replayed
/// state. If the failed append had in fact landed, the retry sees its own
/// events and the reply reflects them (an `AssignVehicle` that landed
/// answers `AlreadyAssigned` rather than `AssignmentReceived`). A behavior
/// whose decision does not look at prior events would append twice.
#[derive(Debug)]
pub struct Deliver<C> {
    pub command: C,
    in_flight: Option<InFlight>,
}

impl<C> Deliver<C> {
    pub fn new(command: C) -> Self {
        Self {
            command,
            in_flight: None,
        }
    }

    pub fn tracked(command: C, in_flight: InFlight) -> Self {
        Self {
            command,
            in_flight: Some(in_flight),
        }
    }
}

/// Read-only query of the engine's current state.
#[derive(Debug, Clone, Copy)]
pub struct Inspect;

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot<I, S> {
    pub state: EntityState<I, S>,
    pub version: u64,
    pub failed: bool,
}

impl<I, S> Reply for EntitySnapshot<I, S>
where
    I: Send + 'static,
    S: Send + 'static,
{
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Entity Actor
// ============================================================================

pub struct EntityActor<B: Behavior> {
    engine: Engine<B>,
    supervisor: RecoverySupervisor<B>,
    metrics: Arc<Metrics>,
    failed: Arc<AtomicBool>,
}

impl<B: Behavior> EntityActor<B> {
    /// `failed` is shared with the directory so that fail-stopped entities
    /// are visible without a round trip through the mailbox.
    pub fn new(
        engine: Engine<B>,
        supervisor: RecoverySupervisor<B>,
        metrics: Arc<Metrics>,
        failed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine,
            supervisor,
            metrics,
            failed,
        }
    }
}

impl<B: Behavior> Actor for EntityActor<B> {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(
            entity = %state.engine.stream(),
            version = state.engine.version(),
            initialized = state.engine.state().is_initialized(),
            "Entity activated"
        );
        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl<B: Behavior> Message<Deliver<B::Command>> for EntityActor<B> {
    type Reply = Result<<B::Command as EntityCommand>::Reply, EntityError>;

    async fn handle(&mut self, msg: Deliver<B::Command>, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.failed.load(Ordering::SeqCst) {
            return Err(EntityError::PermanentlyFailed {
                entity: self.engine.stream().to_string(),
                attempts: self.supervisor.attempts(),
            });
        }

        let Deliver {
            command,
            in_flight: _in_flight,
        } = msg;
        let started = Instant::now();

        loop {
            match self.engine.handle(&command, self.supervisor.log()).await {
                Ok(handled) => {
                    self.supervisor.succeeded();
                    if handled.persisted > 0 {
                        self.metrics.record_persisted(B::ENTITY_TYPE, handled.persisted);
                    }
                    self.metrics
                        .record_command(B::ENTITY_TYPE, started.elapsed().as_secs_f64(), true);
                    return Ok(handled.reply);
                }
                Err(cause) => {
                    self.metrics.record_persist_failure(B::ENTITY_TYPE);

                    match self.supervisor.restart(self.engine.id(), &cause).await {
                        Ok(engine) => {
                            self.engine = engine;
                        }
                        Err(err) => {
                            self.failed.store(true, Ordering::SeqCst);
                            self.metrics
                                .record_command(B::ENTITY_TYPE, started.elapsed().as_secs_f64(), false);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}

impl<B: Behavior> Message<Inspect> for EntityActor<B> {
    type Reply = EntitySnapshot<B::Id, B::State>;

    async fn handle(&mut self, _msg: Inspect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        EntitySnapshot {
            state: self.engine.state().clone(),
            version: self.engine.version(),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}
