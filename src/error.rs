//! Error types for assembly and engine operations.

use std::time::SystemTime;

use crate::timer::TimerState;

/// Errors detected while assembling an engine from its declarations.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Two entities were registered under the same name.
    #[error("entity `{name}` is registered twice")]
    DuplicateEntity {
        /// The colliding entity name.
        name: String,
    },

    /// Two channels were registered under the same name.
    #[error("channel `{name}` is registered twice")]
    DuplicateChannel {
        /// The colliding channel name.
        name: String,
    },

    /// An entity depends on an entity that was never registered.
    #[error("entity `{entity}` depends on unregistered entity `{dependency}`")]
    MissingDependency {
        /// The entity declaring the dependency.
        entity: String,
        /// The dependency that could not be found.
        dependency: String,
    },

    /// An entity listens on a channel that was never registered.
    #[error("entity `{entity}` listens on unregistered channel `{channel}`")]
    UnknownChannel {
        /// The entity declaring the channel.
        entity: String,
        /// The channel that could not be found.
        channel: String,
    },

    /// A non-source entity has neither dependencies nor channels, so nothing
    /// could ever stain its elements.
    #[error("entity `{entity}` has no dependencies and no channels; its elements could never update")]
    NoInputs {
        /// The unreachable entity.
        entity: String,
    },

    /// The dependency declarations form a cycle.
    #[error("dependency cycle among entities: {}", entities.join(", "))]
    DependencyCycle {
        /// Names of the entities left unordered after topological sorting.
        entities: Vec<String>,
    },
}

/// Errors from operations on an assembled engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An evaluation cycle was requested at a time earlier than the previous
    /// cycle's.
    #[error("cycle time {proposed:?} is earlier than the previous cycle's {latest:?}")]
    TimeRegression {
        /// The requested cycle time.
        proposed: SystemTime,
        /// The previous cycle's time.
        latest: SystemTime,
    },

    /// An event was injected on a channel no entity listens to.
    #[error("no entity listens on channel `{channel}`")]
    UnboundChannel {
        /// The channel the event was injected on.
        channel: String,
    },

    /// The addressed entity is not part of this engine.
    #[error("entity `{entity}` is not registered with this engine")]
    UnknownEntity {
        /// The entity name.
        entity: String,
    },

    /// A source-only operation was applied to an inner entity.
    #[error("entity `{entity}` is not a source")]
    NotASource {
        /// The entity name.
        entity: String,
    },

    /// An updater read an entity it never declared as a dependency.
    #[error("entity `{entity}` did not declare a dependency on `{dependency}`")]
    UndeclaredDependency {
        /// The reading entity.
        entity: String,
        /// The entity it tried to read.
        dependency: String,
    },

    /// A creation announcement was narrowed to the wrong entity.
    #[error("expected an element of entity `{expected}`, found `{found}`")]
    EntityMismatch {
        /// The entity the cast targeted.
        expected: String,
        /// The entity the element actually belongs to.
        found: String,
    },

    /// An event payload was extracted with the wrong channel.
    #[error("expected an event on channel `{expected}`, found `{found}`")]
    ChannelMismatch {
        /// The channel the extraction targeted.
        expected: String,
        /// The channel the event was actually injected on.
        found: String,
    },

    /// A timer was requested at or before the current cycle time.
    #[error("timer time {at:?} is not strictly after the cycle time {now:?}")]
    TimerInPast {
        /// The requested expiry.
        at: SystemTime,
        /// The current cycle time.
        now: SystemTime,
    },

    /// A timer that is no longer pending was cancelled.
    #[error("timer is {state:?}, only pending timers can be cancelled")]
    TimerNotPending {
        /// The timer's actual state.
        state: TimerState,
    },

    /// A timer handle does not belong to this engine.
    #[error("unknown timer")]
    UnknownTimer,
}
