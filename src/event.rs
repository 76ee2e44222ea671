//! Type-erased event values routed through channels.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::EngineError;
use crate::key::{ChannelId, EventChannel};

/// An event value paired with the channel it was injected on.
///
/// The payload is type-erased so events of different channels can queue
/// together; [`EngineEvent::value_of`] recovers the typed value.
#[derive(Clone)]
pub struct EngineEvent {
    channel: ChannelId,
    value: Arc<dyn Any + Send + Sync>,
}

impl EngineEvent {
    pub(crate) fn new<E: Send + Sync + 'static>(channel: &EventChannel<E>, value: E) -> Self {
        Self {
            channel: channel.id(),
            value: Arc::new(value),
        }
    }

    /// The channel this event was injected on.
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Whether this event was injected on `channel`.
    pub fn is_on<E: Send + Sync + 'static>(&self, channel: &EventChannel<E>) -> bool {
        self.channel == *channel.erased()
    }

    /// The typed payload, if this event belongs to `channel`.
    pub fn value_of<E: Send + Sync + 'static>(&self, channel: &EventChannel<E>) -> Option<Arc<E>> {
        if self.channel != *channel.erased() {
            return None;
        }
        Arc::clone(&self.value).downcast().ok()
    }
}

impl Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineEvent({})", self.channel.name())
    }
}

impl<E: Send + Sync + 'static> EventChannel<E> {
    /// Extract the payload of an event known to belong to this channel,
    /// failing if it was injected on a different one.
    pub fn extract(&self, event: &EngineEvent) -> Result<Arc<E>, EngineError> {
        event.value_of(self).ok_or_else(|| EngineError::ChannelMismatch {
            expected: self.name().to_owned(),
            found: event.channel().name().to_owned(),
        })
    }
}
