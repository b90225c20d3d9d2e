use std::mem;

use crate::event_sourcing::core::{fold_event, stream_key, Behavior, EntityCommand, EntityState};
use crate::event_sourcing::store::{EventLog, LogError};

// ============================================================================
// Entity Engine - Per-identifier state machine
// ============================================================================
//
// Orchestrates: Command → Behavior → Events → Event Log → Reply → Fold
//
// 1. Decide: run the initial or regular command processor
// 2. Persist: append the events (skipped when there are none)
// 3. Reply: computed only after the append succeeded, from the state the
//    command observed, i.e. before its own events are folded
// 4. Fold: apply the persisted events one by one
//
// If the append fails nothing after step 2 happens: no reply, no fold.
// The engine itself is not concurrent; the owning actor feeds it one
// command at a time.
//
// ============================================================================

/// Result of one successfully handled command.
#[derive(Debug)]
pub struct Handled<R> {
    pub reply: R,
    pub persisted: usize,
}

pub struct Engine<B: Behavior> {
    id: B::Id,
    stream: String,
    state: EntityState<B::Id, B::State>,
    version: u64,
}

impl<B: Behavior> Engine<B> {
    /// Fresh engine with no applied events.
    pub fn new(id: B::Id) -> Self {
        let stream = stream_key(B::ENTITY_TYPE, &id);
        Self {
            state: EntityState::Uninitialized(id.clone()),
            id,
            stream,
            version: 0,
        }
    }

    pub fn id(&self) -> &B::Id {
        &self.id
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn state(&self) -> &EntityState<B::Id, B::State> {
        &self.state
    }

    /// Number of events persisted in this entity's stream.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Fold an event read back from the log. Produces no reply.
    pub fn replay(&mut self, event: &B::Event) {
        self.apply(event);
        self.version += 1;
    }

    /// Run the command processor matching the current state.
    pub fn decide(&self, command: &B::Command) -> Vec<B::Event> {
        match &self.state {
            EntityState::Uninitialized(_) => B::process_initial_command(command),
            EntityState::Initialized(state) => B::process_command(state, command),
        }
    }

    /// Handle one command end to end.
    ///
    /// On `Err` the engine state is untouched, but the append may or may
    /// not have reached the log; the caller must rebuild the engine from
    /// the log before handling anything else.
    pub async fn handle(
        &mut self,
        command: &B::Command,
        log: &dyn EventLog<B::Event>,
    ) -> Result<Handled<<B::Command as EntityCommand>::Reply>, LogError> {
        let events = self.decide(command);
        let was_initialized = self.state.is_initialized();

        if !events.is_empty() {
            self.version = log.append(&self.stream, self.version, &events).await?;
        }

        let reply = match &self.state {
            EntityState::Initialized(state) => command.initialized_reply(state),
            EntityState::Uninitialized(_) => command.uninitialized_reply(),
        };

        for event in &events {
            self.apply(event);
        }

        if !was_initialized {
            if events.is_empty() {
                tracing::warn!(
                    entity = %self.stream,
                    command = ?command,
                    "Command on uninitialized entity produced no events"
                );
            } else if !self.state.is_initialized() {
                tracing::error!(
                    entity = %self.stream,
                    event_count = events.len(),
                    "Initial event applier did not initialize state; entity stays uninitialized"
                );
            }
        }

        tracing::debug!(
            entity = %self.stream,
            version = self.version,
            event_count = events.len(),
            "Handled command"
        );

        Ok(Handled {
            reply,
            persisted: events.len(),
        })
    }

    fn apply(&mut self, event: &B::Event) {
        let current = mem::replace(&mut self.state, EntityState::Uninitialized(self.id.clone()));
        self.state = fold_event::<B>(current, event);
    }
}
