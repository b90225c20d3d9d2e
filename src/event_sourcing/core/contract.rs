use chrono::{DateTime, Utc};
use std::fmt::{Debug, Display};
use std::hash::Hash;

// ============================================================================
// Entity Contracts - Shapes a concrete domain must supply
// ============================================================================
//
// Every domain plugs into the runtime through three contracts:
// - EntityId:      stable identifier, used as routing key and stream key
// - EntityEvent:   immutable fact carrying its entity id and creation time
// - EntityCommand: intent addressed to one entity, able to produce a reply
//                  either from the current state or without any state
//
// ============================================================================

/// Opaque, stable identifier of an entity instance.
///
/// Blanket-implemented for any type that is cheap to clone, comparable,
/// hashable and printable. The `Display` form becomes part of the
/// persistence stream key, so it must not change between releases.
pub trait EntityId: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityId for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Immutable fact produced by a command processor.
pub trait EntityEvent: Clone + Debug + Send + Sync + 'static {
    type Id: EntityId;

    fn entity_id(&self) -> &Self::Id;

    fn created_at(&self) -> DateTime<Utc>;
}

/// Intent submitted to a single entity.
///
/// A command never mutates state. It only knows how to phrase its reply,
/// given either the state it observed or the absence of any state.
pub trait EntityCommand: Debug + Send + Sync + 'static {
    type Id: EntityId;
    type State;
    type Reply: Debug + Send + 'static;

    fn entity_id(&self) -> &Self::Id;

    /// Reply for a command handled by an initialized entity.
    fn initialized_reply(&self, state: &Self::State) -> Self::Reply;

    /// Reply for a command handled by an entity with no applied events.
    fn uninitialized_reply(&self) -> Self::Reply;
}

/// Build the persistence stream key for an entity.
pub fn stream_key<I: EntityId>(entity_type: &str, id: &I) -> String {
    format!("{}-{}", entity_type, id)
}

// ============================================================================
// Tests
// ============================================================================
