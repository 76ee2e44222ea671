//! What an updater can reach while it runs: dependency reads, pending
//! events, and timers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::SystemTime;

use crate::context::UpdateContext;
use crate::element::{ElementStatus, SubscriptionType};
use crate::engine::EngineCore;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::graph::ElementId;
use crate::key::{ElementKey, EntityId, EntityKey, EntityState, EventChannel};
use crate::manager::EntityManager;
use crate::timer::{ElementTimer, TimerState};

/// Capabilities handed to an updater for the duration of one `update` call.
///
/// Every dependency read goes through [`Toolbox::get`], which checks the
/// declaration, lazily creates the element, and hands back a typed handle.
pub struct Toolbox<'a> {
    core: &'a EngineCore,
    subscriber: ElementId,
    dependencies: &'a HashMap<EntityId, usize>,
    entity: EntityId,
    events: &'a [EngineEvent],
}

impl<'a> Toolbox<'a> {
    pub(crate) fn new(
        core: &'a EngineCore,
        subscriber: ElementId,
        dependencies: &'a HashMap<EntityId, usize>,
        entity: EntityId,
        events: &'a [EngineEvent],
    ) -> Self {
        Self {
            core,
            subscriber,
            dependencies,
            entity,
            events,
        }
    }

    /// Reach the element `key` of a declared dependency. The element is
    /// created lazily if absent, and the first read installs a strong
    /// subscription; use [`ElementHandle::subscribe`] to weaken it.
    pub fn get<K: ElementKey, S: EntityState>(
        &self,
        entity: &EntityKey<K, S>,
        key: &K,
    ) -> Result<ElementHandle<'a, K, S>, EngineError> {
        let &manager = self.dependencies.get(entity.erased()).ok_or_else(|| {
            EngineError::UndeclaredDependency {
                entity: self.entity.name().to_owned(),
                dependency: entity.name().to_owned(),
            }
        })?;
        let broadcaster = {
            let mut cell = self.core.managers[manager].borrow_mut();
            let typed = cell
                .as_any_mut()
                .downcast_mut::<EntityManager<K, S>>()
                .ok_or_else(|| EngineError::UnknownEntity {
                    entity: entity.name().to_owned(),
                })?;
            typed.get_or_create(self.core, key)
        };
        let mut graph = self.core.graph.borrow_mut();
        if graph.subscription(broadcaster, self.subscriber) == SubscriptionType::None {
            graph.set_subscription(broadcaster, self.subscriber, SubscriptionType::Strong);
        }
        Ok(ElementHandle {
            core: self.core,
            manager,
            broadcaster,
            subscriber: self.subscriber,
            _marker: PhantomData,
        })
    }

    /// Events routed to this element since its updater last ran, oldest
    /// first.
    pub fn events(&self) -> &[EngineEvent] {
        self.events
    }

    /// Typed payloads of the pending events that belong to `channel`.
    pub fn events_on<'c, E: Send + Sync + 'static>(
        &'c self,
        channel: &'c EventChannel<E>,
    ) -> impl Iterator<Item = Arc<E>> + 'c {
        self.events.iter().filter_map(move |e| e.value_of(channel))
    }

    /// Arrange for this element to be stained at the first cycle whose time
    /// reaches `at`. The expiry must be strictly after the current cycle
    /// time.
    pub fn set_timer(&self, at: SystemTime) -> Result<ElementTimer, EngineError> {
        self.core
            .timers
            .borrow_mut()
            .create(self.subscriber, at, self.core.ctx.time())
    }

    /// Cancel a pending timer.
    pub fn cancel_timer(&self, timer: &ElementTimer) -> Result<(), EngineError> {
        self.core.timers.borrow_mut().cancel(timer)
    }

    pub fn timer_state(&self, timer: &ElementTimer) -> Result<TimerState, EngineError> {
        self.core.timers.borrow().state(timer)
    }
}

/// Typed view of one upstream element, as obtained through [`Toolbox::get`]
/// or [`NewElement::cast`]. Borrowing the engine core, so it lives only
/// within the updater call that produced it.
pub struct ElementHandle<'a, K, S> {
    core: &'a EngineCore,
    manager: usize,
    broadcaster: ElementId,
    subscriber: ElementId,
    _marker: PhantomData<fn() -> (K, S)>,
}

impl<K: ElementKey, S: EntityState> ElementHandle<'_, K, S> {
    /// The upstream element's key.
    pub fn key(&self) -> K {
        let graph = self.core.graph.borrow();
        graph
            .node(self.broadcaster)
            .key
            .as_any()
            .downcast_ref::<K>()
            .cloned()
            .expect("typed handles always carry a key of the entity's key type")
    }

    pub fn status(&self) -> ElementStatus {
        self.core.graph.borrow().status(self.broadcaster)
    }

    /// The upstream state, present only while the element is
    /// [`ElementStatus::Ok`].
    pub fn state(&self) -> Option<Arc<S>> {
        if !self.status().is_ok() {
            return None;
        }
        let cell = self.core.managers[self.manager].borrow();
        let typed = cell.as_any().downcast_ref::<EntityManager<K, S>>()?;
        typed.element(self.broadcaster).and_then(|e| e.state.clone())
    }

    /// The upstream state, or `default` while the element is not `Ok`.
    pub fn state_or(&self, default: S) -> Arc<S> {
        self.state().unwrap_or_else(|| Arc::new(default))
    }

    /// Stamp of the cycle that last changed the upstream element.
    pub fn update_context(&self) -> UpdateContext {
        self.core.graph.borrow().node(self.broadcaster).update_context
    }

    /// Whether the upstream element changed after the reading element last
    /// did. The usual "which input woke me" check.
    pub fn has_updated(&self) -> bool {
        let graph = self.core.graph.borrow();
        let upstream = graph.node(self.broadcaster).update_context;
        let own = graph.node(self.subscriber).update_context;
        upstream.is_newer_than(&own)
    }

    /// The current strength of the reading element's subscription to this
    /// one.
    pub fn subscription(&self) -> SubscriptionType {
        self.core
            .graph
            .borrow()
            .subscription(self.broadcaster, self.subscriber)
    }

    /// Adjust the subscription strength. [`SubscriptionType::None`] severs
    /// the relation; a later [`Toolbox::get`] would re-create it as strong.
    pub fn subscribe(&self, subscription: SubscriptionType) -> &Self {
        self.core
            .graph
            .borrow_mut()
            .set_subscription(self.broadcaster, self.subscriber, subscription);
        self
    }
}

/// A creation announcement: some upstream element this element was told
/// about now exists. Delivered to
/// [`ElementUpdater::on_new_element`](crate::ElementUpdater::on_new_element)
/// before the cycle's updates run.
pub struct NewElement<'a> {
    core: &'a EngineCore,
    broadcaster: ElementId,
    subscriber: ElementId,
}

impl<'a> NewElement<'a> {
    pub(crate) fn new(core: &'a EngineCore, broadcaster: ElementId, subscriber: ElementId) -> Self {
        Self {
            core,
            broadcaster,
            subscriber,
        }
    }

    /// The entity the new element belongs to.
    pub fn entity(&self) -> EntityId {
        let manager = self.core.graph.borrow().node(self.broadcaster).entity;
        self.core.managers[manager].borrow().entity_id()
    }

    /// Whether the new element belongs to `entity`.
    pub fn is<K: ElementKey, S: EntityState>(&self, entity: &EntityKey<K, S>) -> bool {
        self.entity() == *entity.erased()
    }

    /// Narrow the announcement to a typed handle, failing fast if the new
    /// element belongs to a different entity.
    pub fn cast<K: ElementKey, S: EntityState>(
        &self,
        entity: &EntityKey<K, S>,
    ) -> Result<ElementHandle<'a, K, S>, EngineError> {
        let found = self.entity();
        if found != *entity.erased() {
            return Err(EngineError::EntityMismatch {
                expected: entity.name().to_owned(),
                found: found.name().to_owned(),
            });
        }
        let manager = self.core.graph.borrow().node(self.broadcaster).entity;
        Ok(ElementHandle {
            core: self.core,
            manager,
            broadcaster: self.broadcaster,
            subscriber: self.subscriber,
            _marker: PhantomData,
        })
    }
}
