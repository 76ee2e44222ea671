//! Element factories: how entities decide which keys exist and how their
//! updaters are built.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::UpdateContext;
use crate::element::{ElementUpdater, UpdateResult};
use crate::event::EngineEvent;
use crate::key::{ElementKey, EntityId, EntityKey, EntityState, ErasedKey, EventChannel};
use crate::toolbox::Toolbox;

/// Which of an entity's keys a factory wants materialized or notified.
pub enum NotifySet<K> {
    /// Nobody.
    None,
    /// These keys. Keys that do not exist yet are created.
    Keys(Vec<K>),
    /// Every element the entity currently knows. Creates nothing.
    All,
}

impl<K> NotifySet<K> {
    /// Exactly one key.
    pub fn key(key: K) -> Self {
        NotifySet::Keys(vec![key])
    }

    /// The given keys.
    pub fn keys(keys: impl IntoIterator<Item = K>) -> Self {
        NotifySet::Keys(keys.into_iter().collect())
    }
}

/// A newly created upstream element, as seen by a downstream factory deciding
/// which of its own keys to materialize in response.
pub struct UpstreamKey<'a> {
    pub(crate) entity: &'a EntityId,
    pub(crate) key: &'a dyn ErasedKey,
}

impl<'a> UpstreamKey<'a> {
    /// The entity the new element belongs to.
    pub fn entity(&self) -> &EntityId {
        self.entity
    }

    /// Whether the new element belongs to `entity`.
    pub fn is<K: ElementKey, S: EntityState>(&self, entity: &EntityKey<K, S>) -> bool {
        self.entity == entity.erased()
    }

    /// The typed key, if the new element belongs to `entity`.
    pub fn key_for<K: ElementKey, S: EntityState>(&self, entity: &EntityKey<K, S>) -> Option<&K> {
        if !self.is(entity) {
            return None;
        }
        self.key.as_any().downcast_ref()
    }
}

impl std::fmt::Debug for UpstreamKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UpstreamKey({}, {:?})", self.entity.name(), self.key)
    }
}

/// Per-entity hook deciding which elements exist and building their updaters.
///
/// One factory instance exists per inner entity. Its `create` runs lazily the
/// first time a key is materialized, whether by a dependency read, a creation
/// announcement, or an event.
pub trait ElementFactory<K: ElementKey, S: EntityState>: Send + 'static {
    /// Build the updater for a newly materialized key.
    fn create(&mut self, key: &K, ctx: &UpdateContext) -> Box<dyn ElementUpdater<S>>;

    /// A new element appeared in one of this entity's dependencies. Return
    /// the keys of this entity that should learn about it; they are created
    /// if absent, and each receives an
    /// [`on_new_element`](ElementUpdater::on_new_element) call before updates
    /// run. The default ignores the creation.
    fn on_new_key(&mut self, upstream: &UpstreamKey<'_>) -> NotifySet<K> {
        let _ = upstream;
        NotifySet::None
    }

    /// An event arrived on one of this entity's channels. Return the keys to
    /// hand the event to; they are created if absent, stained, and see the
    /// event in [`Toolbox::events`] when their updater runs. The default
    /// ignores the event.
    fn on_event(&mut self, event: &EngineEvent) -> NotifySet<K> {
        let _ = event;
        NotifySet::None
    }
}

/// Ready-made factory for entities that mirror an event channel: each event
/// is mapped to a key and a state, and the element for that key takes the
/// state of the latest event.
pub struct ChannelFactory<E, K, S, FK, FS> {
    channel: EventChannel<E>,
    key_fn: FK,
    state_fn: Arc<FS>,
    _marker: PhantomData<fn() -> (K, S)>,
}

impl<E, K, S, FK, FS> ChannelFactory<E, K, S, FK, FS>
where
    E: Send + Sync + 'static,
    FK: Fn(&E) -> K,
    FS: Fn(&E) -> S,
{
    pub fn new(channel: EventChannel<E>, key_fn: FK, state_fn: FS) -> Self {
        Self {
            channel,
            key_fn,
            state_fn: Arc::new(state_fn),
            _marker: PhantomData,
        }
    }
}

impl<E, K, S, FK, FS> ElementFactory<K, S> for ChannelFactory<E, K, S, FK, FS>
where
    E: Send + Sync + 'static,
    K: ElementKey,
    S: EntityState,
    FK: Fn(&E) -> K + Send + 'static,
    FS: Fn(&E) -> S + Send + Sync + 'static,
{
    fn create(&mut self, _key: &K, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<S>> {
        Box::new(ChannelUpdater {
            channel: self.channel.clone(),
            state_fn: Arc::clone(&self.state_fn),
            _marker: PhantomData,
        })
    }

    fn on_event(&mut self, event: &EngineEvent) -> NotifySet<K> {
        match event.value_of(&self.channel) {
            Some(value) => NotifySet::key((self.key_fn)(&value)),
            None => NotifySet::None,
        }
    }
}

struct ChannelUpdater<E, S, FS> {
    channel: EventChannel<E>,
    state_fn: Arc<FS>,
    _marker: PhantomData<fn() -> S>,
}

impl<E, S, FS> ElementUpdater<S> for ChannelUpdater<E, S, FS>
where
    E: Send + Sync + 'static,
    S: EntityState,
    FS: Fn(&E) -> S + Send + Sync + 'static,
{
    fn update(
        &mut self,
        _previous: Option<&S>,
        _ctx: &UpdateContext,
        toolbox: &Toolbox<'_>,
    ) -> anyhow::Result<UpdateResult<S>> {
        // Channel elements are only ever stained by their own events, so the
        // queue cannot be empty here.
        let latest = toolbox
            .events_on(&self.channel)
            .last()
            .ok_or_else(|| anyhow::anyhow!("channel element woken without a pending event"))?;
        Ok(UpdateResult::Updated((self.state_fn)(&latest)))
    }
}
