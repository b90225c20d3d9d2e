use std::fmt::Debug;

use super::contract::{EntityCommand, EntityEvent, EntityId};

// ============================================================================
// Entity Behavior - Pluggable Business Logic
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (never stored directly)
// 2. Commands are decided against state, producing zero or more events
// 3. Events represent facts that have already happened
// 4. All four plugin functions are pure: no I/O, no held state
//
// A Behavior is registered once per entity type and shared by every
// instance of that type. It is never instantiated: all functions are
// associated functions.
//
// ============================================================================

/// Business logic of one entity type.
pub trait Behavior: Send + Sync + 'static {
    type Id: EntityId;
    type State: Clone + Debug + Send + Sync + 'static;
    type Event: EntityEvent<Id = Self::Id>;
    type Command: EntityCommand<Id = Self::Id, State = Self::State>;

    /// Entity type name, used as the stream key prefix and metrics label.
    const ENTITY_TYPE: &'static str;

    /// Decide on a command addressed to an entity with no applied events.
    fn process_initial_command(command: &Self::Command) -> Vec<Self::Event>;

    /// Decide on a command addressed to an initialized entity.
    fn process_command(state: &Self::State, command: &Self::Command) -> Vec<Self::Event>;

    /// Create the inner state from the first event, if it is a creation event.
    fn apply_initial_event(event: &Self::Event) -> Option<Self::State>;

    /// Fold a subsequent event into the inner state.
    fn apply_event(state: Self::State, event: &Self::Event) -> Self::State;
}

/// State owned by an engine: either nothing has happened yet, or the
/// domain state folded from the events so far.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityState<I, S> {
    Uninitialized(I),
    Initialized(S),
}

impl<I, S> EntityState<I, S> {
    pub fn is_initialized(&self) -> bool {
        matches!(self, EntityState::Initialized(_))
    }

    pub fn inner(&self) -> Option<&S> {
        match self {
            EntityState::Initialized(state) => Some(state),
            EntityState::Uninitialized(_) => None,
        }
    }
}

/// Fold one event into an entity state.
///
/// `Uninitialized` only ever leaves through the initial applier; once
/// `Initialized`, the state never goes back. Live processing and replay
/// both go through this function, which is what makes them equivalent.
pub fn fold_event<B: Behavior>(
    state: EntityState<B::Id, B::State>,
    event: &B::Event,
) -> EntityState<B::Id, B::State> {
    match state {
        EntityState::Uninitialized(id) => match B::apply_initial_event(event) {
            Some(inner) => EntityState::Initialized(inner),
            None => EntityState::Uninitialized(id),
        },
        EntityState::Initialized(inner) => EntityState::Initialized(B::apply_event(inner, event)),
    }
}

/// Rebuild state from an event history, starting from `Uninitialized`.
pub fn load_from_events<'a, B, It>(id: B::Id, events: It) -> EntityState<B::Id, B::State>
where
    B: Behavior,
    It: IntoIterator<Item = &'a B::Event>,
{
    events
        .into_iter()
        .fold(EntityState::Uninitialized(id), |state, event| fold_event::<B>(state, event))
}

// ============================================================================
// Tests
// ============================================================================
