//! The assembled engine and its evaluation cycle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::builder::EngineBuilder;
use crate::context::UpdateContext;
use crate::element::ElementView;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::graph::ElementGraph;
use crate::key::{ChannelId, ElementKey, EntityId, EntityKey, EntityState, EventChannel};
use crate::manager::{AnyEntityManager, EntityManager};
use crate::timer::TimerStore;

/// Shared spine of an engine: the cycle stamp, the bookkeeping graph, the
/// managers in topological order, and the timers.
///
/// Everything cross-cutting sits behind `RefCell`s so a manager, while its
/// own cell is borrowed for an update, can still reach the graph, the
/// timers, and its dependencies' cells. Updates run strictly one element at
/// a time, and an entity can never depend on itself, so those borrows are
/// disjoint.
pub(crate) struct EngineCore {
    pub(crate) ctx: UpdateContext,
    pub(crate) graph: RefCell<ElementGraph>,
    /// Managers in dependency order; an entity's index is greater than all
    /// of its dependencies' indices.
    pub(crate) managers: Vec<RefCell<Box<dyn AnyEntityManager>>>,
    pub(crate) timers: RefCell<TimerStore>,
}

/// An assembled computation graph, driven one evaluation cycle at a time.
///
/// Build one with [`Engine::builder`]. Between cycles, push source values
/// with [`set_state`](Engine::set_state), inject events with
/// [`inject_event`](Engine::inject_event), and read results with
/// [`get_element`](Engine::get_element); each [`run_once`](Engine::run_once)
/// then propagates all accumulated input through the graph in dependency
/// order.
pub struct Engine {
    core: EngineCore,
    by_id: HashMap<EntityId, usize>,
    /// Managers listening on each channel, in topological order.
    channels: HashMap<ChannelId, Vec<usize>>,
    pending_events: Vec<EngineEvent>,
}

impl Engine {
    /// Start declaring entities and channels.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn assembled(
        managers: Vec<RefCell<Box<dyn AnyEntityManager>>>,
        by_id: HashMap<EntityId, usize>,
        channels: HashMap<ChannelId, Vec<usize>>,
    ) -> Self {
        Self {
            core: EngineCore {
                ctx: UpdateContext::none(),
                graph: RefCell::new(ElementGraph::new()),
                managers,
                timers: RefCell::new(TimerStore::new()),
            },
            by_id,
            channels,
            pending_events: Vec::new(),
        }
    }

    /// Run one evaluation cycle stamped with the current wall-clock time.
    pub fn run_once(&mut self) -> Result<UpdateContext, EngineError> {
        self.run_once_at(SystemTime::now())
    }

    /// Run one evaluation cycle stamped with `time`, which must not be
    /// earlier than the previous cycle's time.
    pub fn run_once_at(&mut self, time: SystemTime) -> Result<UpdateContext, EngineError> {
        if time < self.core.ctx.time() {
            return Err(EngineError::TimeRegression {
                proposed: time,
                latest: self.core.ctx.time(),
            });
        }
        self.core.ctx = self.core.ctx.next(time);
        let ctx = self.core.ctx;
        debug!(update_id = ctx.update_id(), "evaluation cycle starting");

        self.flush_timers();
        self.propagate_events();
        self.propagate_creations();
        self.propagate_updates();

        debug!(update_id = ctx.update_id(), "evaluation cycle finished");
        Ok(ctx)
    }

    /// The stamp of the latest cycle, [`UpdateContext::none`] before the
    /// first.
    pub fn latest_context(&self) -> UpdateContext {
        self.core.ctx
    }

    /// Queue an event for the next cycle. Fails if no entity listens on the
    /// channel, so a misrouted event surfaces instead of vanishing.
    pub fn inject_event<E: Send + Sync + 'static>(
        &mut self,
        channel: &EventChannel<E>,
        value: E,
    ) -> Result<(), EngineError> {
        if !self.channels.contains_key(channel.erased()) {
            return Err(EngineError::UnboundChannel {
                channel: channel.name().to_owned(),
            });
        }
        self.pending_events.push(EngineEvent::new(channel, value));
        Ok(())
    }

    /// Push a value into a source element, creating it if absent. The next
    /// cycle propagates the change.
    pub fn set_state<K: ElementKey, S: EntityState>(
        &mut self,
        entity: &EntityKey<K, S>,
        key: K,
        state: S,
    ) -> Result<(), EngineError> {
        self.push_source(entity, key, Some(Arc::new(state)))
    }

    /// Withdraw a source element's value; the next cycle deletes the
    /// element.
    pub fn unset_state<K: ElementKey, S: EntityState>(
        &mut self,
        entity: &EntityKey<K, S>,
        key: K,
    ) -> Result<(), EngineError> {
        self.push_source(entity, key, None)
    }

    fn push_source<K: ElementKey, S: EntityState>(
        &mut self,
        entity: &EntityKey<K, S>,
        key: K,
        latest: Option<Arc<S>>,
    ) -> Result<(), EngineError> {
        let index = self.manager_index(entity.erased())?;
        let mut cell = self.core.managers[index].borrow_mut();
        if !cell.is_source() {
            return Err(EngineError::NotASource {
                entity: entity.name().to_owned(),
            });
        }
        let typed = cell
            .as_any_mut()
            .downcast_mut::<EntityManager<K, S>>()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: entity.name().to_owned(),
            })?;
        typed.set_source(&self.core, key, latest);
        Ok(())
    }

    /// Snapshot one element, or `None` if the key was never seen.
    pub fn get_element<K: ElementKey, S: EntityState>(
        &self,
        entity: &EntityKey<K, S>,
        key: &K,
    ) -> Result<Option<ElementView<K, S>>, EngineError> {
        let index = self.manager_index(entity.erased())?;
        let cell = self.core.managers[index].borrow();
        let typed = cell
            .as_any()
            .downcast_ref::<EntityManager<K, S>>()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: entity.name().to_owned(),
            })?;
        Ok(typed.view(&self.core, key))
    }

    /// Current state of one element; `None` when absent or not `Ok`.
    pub fn get_state<K: ElementKey, S: EntityState>(
        &self,
        entity: &EntityKey<K, S>,
        key: &K,
    ) -> Result<Option<Arc<S>>, EngineError> {
        Ok(self.get_element(entity, key)?.and_then(|view| view.state))
    }

    /// Every element of `entity` that changed in a cycle newer than `since`.
    /// Pass the stamp returned by an earlier poll to pick up exactly the
    /// changes in between.
    pub fn get_updated<K: ElementKey, S: EntityState>(
        &self,
        entity: &EntityKey<K, S>,
        since: &UpdateContext,
    ) -> Result<Vec<ElementView<K, S>>, EngineError> {
        if !self.core.ctx.is_newer_than(since) {
            return Ok(Vec::new());
        }
        let index = self.manager_index(entity.erased())?;
        let cell = self.core.managers[index].borrow();
        let typed = cell
            .as_any()
            .downcast_ref::<EntityManager<K, S>>()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: entity.name().to_owned(),
            })?;
        Ok(typed.updated_since(&self.core, since))
    }

    fn manager_index(&self, entity: &EntityId) -> Result<usize, EngineError> {
        self.by_id
            .get(entity)
            .copied()
            .ok_or_else(|| EngineError::UnknownEntity {
                entity: entity.name().to_owned(),
            })
    }

    fn flush_timers(&mut self) {
        let mut graph = self.core.graph.borrow_mut();
        let fired = self
            .core
            .timers
            .borrow_mut()
            .notify_next(self.core.ctx.time(), &mut graph);
        if fired > 0 {
            trace!(fired, "timers triggered");
        }
    }

    fn propagate_events(&mut self) {
        let events = std::mem::take(&mut self.pending_events);
        for event in events {
            trace!(channel = event.channel().name(), "routing event");
            let Some(listeners) = self.channels.get(event.channel()) else {
                continue;
            };
            for &listener in listeners {
                self.core.managers[listener]
                    .borrow_mut()
                    .process_event(&self.core, &event);
            }
        }
    }

    /// Two passes in dependency order: first let every factory react to the
    /// elements its dependencies created (possibly creating more, which the
    /// same sweep picks up downstream), then deliver the queued
    /// announcements to the updaters.
    fn propagate_creations(&mut self) {
        for subscriber in 0..self.core.managers.len() {
            let dependencies: Vec<(EntityId, usize)> = self.core.managers[subscriber]
                .borrow()
                .dependency_list()
                .to_vec();
            for (upstream, dependency) in dependencies {
                let created = self.core.managers[dependency]
                    .borrow()
                    .created_elements(&self.core);
                if created.is_empty() {
                    continue;
                }
                let mut cell = self.core.managers[subscriber].borrow_mut();
                for (node, key) in created {
                    cell.notify_new_upstream(&self.core, &upstream, key.as_ref(), node);
                }
            }
        }
        for manager in &self.core.managers {
            manager.borrow_mut().flush_creations(&self.core);
        }
    }

    fn propagate_updates(&mut self) {
        for manager in &self.core.managers {
            manager.borrow_mut().run(&self.core);
        }
    }
}
