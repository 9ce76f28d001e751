//! State Machine Engine
//!
//! One finite-state machine per monitored entity. [`state`] holds the pure
//! transition rules, [`engine`] owns the live machines and turns device
//! polls into [`Notification`]s for the event manager.

pub mod engine;
pub mod state;

pub use engine::{EntityRecord, Notification, PollOutcome, StateEngine};
pub use state::{
    CounterData, EntityData, EntityKey, EntityKind, EntityState, Link, Observation, StateChange,
    StateParams, StateValue,
};
