//! Per-entity element managers.
//!
//! Each entity gets one manager holding the typed side of its elements
//! (keys, states, updaters, queued events) plus the entity's declared
//! dependencies. The engine drives managers through the object-safe
//! [`AnyEntityManager`]; one checked downcast at that boundary recovers the
//! typed manager, and everything inside is statically typed.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::context::UpdateContext;
use crate::element::{ElementStatus, ElementUpdater, ElementView, UpdateResult};
use crate::engine::EngineCore;
use crate::event::EngineEvent;
use crate::factory::{ElementFactory, NotifySet, UpstreamKey};
use crate::graph::{ElementId, Readiness};
use crate::key::{ElementKey, EntityId, EntityKey, EntityState, ErasedKey};
use crate::toolbox::Toolbox;

/// The typed half of one element. Cross-entity bookkeeping (status, edges,
/// counters) lives in the graph under the same [`ElementId`].
pub(crate) struct TypedElement<S> {
    pub(crate) state: Option<Arc<S>>,
    pub(crate) updater: Option<Box<dyn ElementUpdater<S>>>,
    /// Events routed to this element since its updater last ran.
    pub(crate) pending_events: Vec<EngineEvent>,
    /// For source entities only: the externally pushed value. `None` after
    /// `unset_state`, which makes the next evaluation delete the element.
    pub(crate) source_latest: Option<Arc<S>>,
}

impl<S> TypedElement<S> {
    fn new() -> Self {
        Self {
            state: None,
            updater: None,
            pending_events: Vec::new(),
            source_latest: None,
        }
    }
}

pub(crate) struct EntityManager<K, S> {
    entity: EntityKey<K, S>,
    /// This manager's position in the engine's topologically ordered list.
    position: usize,
    /// `None` for source entities; their elements have no updaters.
    factory: Option<Box<dyn ElementFactory<K, S>>>,
    /// Declared dependencies, for lookup during toolbox reads.
    dependencies: HashMap<EntityId, usize>,
    /// Same dependencies in declaration order, for deterministic iteration.
    dependency_list: Vec<(EntityId, usize)>,
    index: HashMap<K, ElementId>,
    elements: HashMap<ElementId, TypedElement<S>>,
}

impl<K: ElementKey, S: EntityState> EntityManager<K, S> {
    pub(crate) fn new_source(entity: EntityKey<K, S>, position: usize) -> Self {
        Self {
            entity,
            position,
            factory: None,
            dependencies: HashMap::new(),
            dependency_list: Vec::new(),
            index: HashMap::new(),
            elements: HashMap::new(),
        }
    }

    pub(crate) fn new_inner(
        entity: EntityKey<K, S>,
        position: usize,
        factory: Box<dyn ElementFactory<K, S>>,
        dependency_list: Vec<(EntityId, usize)>,
    ) -> Self {
        let dependencies = dependency_list.iter().cloned().collect();
        Self {
            entity,
            position,
            factory: Some(factory),
            dependencies,
            dependency_list,
            index: HashMap::new(),
            elements: HashMap::new(),
        }
    }

    /// Look up or allocate the element for `key`. A freshly allocated
    /// element starts as a shadow and is promoted to
    /// [`ElementStatus::Created`] before this returns, with (for inner
    /// entities) an updater built by the factory.
    pub(crate) fn get_or_create(&mut self, core: &EngineCore, key: &K) -> ElementId {
        let id = match self.index.get(key) {
            Some(&id) => id,
            None => {
                let id = core
                    .graph
                    .borrow_mut()
                    .insert(self.position, Arc::new(key.clone()));
                self.index.insert(key.clone(), id);
                self.elements.insert(id, TypedElement::new());
                id
            }
        };
        if core.graph.borrow().status(id) == ElementStatus::Shadow {
            if let Some(factory) = self.factory.as_mut() {
                let updater = factory.create(key, &core.ctx);
                if let Some(element) = self.elements.get_mut(&id) {
                    element.updater = Some(updater);
                }
            }
            core.graph.borrow_mut().set_status(id, ElementStatus::Created);
        }
        id
    }

    pub(crate) fn element(&self, id: ElementId) -> Option<&TypedElement<S>> {
        self.elements.get(&id)
    }

    /// Push an externally supplied source value (or its removal) and stain
    /// the element so the next cycle propagates it.
    pub(crate) fn set_source(&mut self, core: &EngineCore, key: K, latest: Option<Arc<S>>) {
        let id = self.get_or_create(core, &key);
        if let Some(element) = self.elements.get_mut(&id) {
            element.source_latest = latest;
        }
        core.graph.borrow_mut().stain(id);
    }

    pub(crate) fn view(&self, core: &EngineCore, key: &K) -> Option<ElementView<K, S>> {
        let &id = self.index.get(key)?;
        let element = self.elements.get(&id)?;
        let graph = core.graph.borrow();
        let node = graph.node(id);
        Some(ElementView {
            key: key.clone(),
            status: node.status,
            state: element.state.clone(),
            update_context: node.update_context,
            fault: node.fault.clone(),
        })
    }

    pub(crate) fn updated_since(
        &self,
        core: &EngineCore,
        since: &UpdateContext,
    ) -> Vec<ElementView<K, S>> {
        let graph = core.graph.borrow();
        let mut views = Vec::new();
        for (key, &id) in &self.index {
            let node = graph.node(id);
            if !node.update_context.is_newer_than(since) {
                continue;
            }
            let Some(element) = self.elements.get(&id) else {
                continue;
            };
            views.push(ElementView {
                key: key.clone(),
                status: node.status,
                state: element.state.clone(),
                update_context: node.update_context,
                fault: node.fault.clone(),
            });
        }
        views
    }

    fn update_element(&mut self, core: &EngineCore, id: ElementId) {
        let readiness = core.graph.borrow().readiness(id);
        let outcome = match readiness {
            Readiness::Failed => Ok(UpdateResult::UpstreamError),
            Readiness::Blocked => Ok(UpdateResult::NotReady),
            Readiness::Ready => self.invoke(core, id),
        };
        self.apply(core, id, outcome);
    }

    /// Run the element's own computation. Events queued on the element are
    /// consumed here and only here: if readiness kept the updater from
    /// running, they stay queued for the next attempt.
    fn invoke(&mut self, core: &EngineCore, id: ElementId) -> anyhow::Result<UpdateResult<Arc<S>>> {
        let Self {
            entity,
            factory,
            dependencies,
            elements,
            ..
        } = self;
        let Some(element) = elements.get_mut(&id) else {
            anyhow::bail!("element {id} is not managed by entity `{}`", entity.name());
        };
        if factory.is_none() {
            return Ok(match element.source_latest.clone() {
                Some(latest) => UpdateResult::Updated(latest),
                None => UpdateResult::Delete,
            });
        }
        let TypedElement {
            state,
            updater,
            pending_events,
            ..
        } = element;
        let Some(updater) = updater.as_mut() else {
            anyhow::bail!(
                "element {id} of entity `{}` was stained before materialization",
                entity.name()
            );
        };
        let toolbox = Toolbox::new(core, id, dependencies, entity.id(), pending_events);
        let result = updater.update(state.as_deref(), &core.ctx, &toolbox);
        drop(toolbox);
        pending_events.clear();
        result.map(|r| r.map_state(Arc::new))
    }

    fn apply(
        &mut self,
        core: &EngineCore,
        id: ElementId,
        outcome: anyhow::Result<UpdateResult<Arc<S>>>,
    ) {
        let entity_name = self.entity.name().to_owned();
        let Some(element) = self.elements.get_mut(&id) else {
            return;
        };
        let mut graph = core.graph.borrow_mut();
        let changed = match outcome {
            Ok(UpdateResult::Updated(state)) => {
                element.state = Some(state);
                graph.set_status(id, ElementStatus::Ok);
                graph.clear_fault(id);
                true
            }
            Ok(UpdateResult::Maybe(state)) => {
                let changed = match &element.state {
                    Some(previous) => **previous != *state,
                    None => true,
                };
                element.state = Some(state);
                graph.set_status(id, ElementStatus::Ok);
                graph.clear_fault(id);
                changed
            }
            Ok(UpdateResult::Delete) => {
                element.state = None;
                graph.clear_fault(id);
                graph.replace_status(id, ElementStatus::Deleted)
            }
            Ok(UpdateResult::NotReady) => {
                element.state = None;
                graph.clear_fault(id);
                graph.replace_status(id, ElementStatus::NotReady)
            }
            Ok(UpdateResult::Nothing) => {
                if graph.status(id) != ElementStatus::Ok {
                    let fault = anyhow::anyhow!(
                        "updater of entity `{}` returned Nothing while the element held no state",
                        entity_name
                    );
                    error!(entity = %entity_name, %fault, "updater contract violation");
                    element.state = None;
                    graph.record_fault(id, Arc::new(fault));
                    graph.replace_status(id, ElementStatus::Error)
                } else {
                    false
                }
            }
            Ok(UpdateResult::Error(fault)) => {
                error!(entity = %entity_name, %fault, "element update failed");
                element.state = None;
                graph.record_fault(id, Arc::new(fault));
                graph.replace_status(id, ElementStatus::Error)
            }
            Ok(UpdateResult::UpstreamError) => {
                element.state = None;
                graph.clear_fault(id);
                graph.replace_status(id, ElementStatus::UpstreamError)
            }
            Err(fault) => {
                error!(entity = %entity_name, %fault, "element update failed");
                element.state = None;
                graph.record_fault(id, Arc::new(fault));
                graph.replace_status(id, ElementStatus::Error)
            }
        };
        if changed {
            graph.mark_changed(id, core.ctx);
        }
        graph.reset_notifications(id);
    }
}

/// Object-safe surface the engine drives managers through.
pub(crate) trait AnyEntityManager: Send {
    fn entity_id(&self) -> EntityId;
    fn is_source(&self) -> bool;
    fn dependency_list(&self) -> &[(EntityId, usize)];

    /// Evaluate every stained element of this entity.
    fn run(&mut self, core: &EngineCore);

    /// Route one event through the factory's `on_event`.
    fn process_event(&mut self, core: &EngineCore, event: &EngineEvent);

    /// Tell the factory about a newly created upstream element and queue the
    /// announcements it asks for.
    fn notify_new_upstream(
        &mut self,
        core: &EngineCore,
        upstream: &EntityId,
        key: &dyn ErasedKey,
        node: ElementId,
    );

    /// Deliver queued creation announcements to the updaters.
    fn flush_creations(&mut self, core: &EngineCore);

    /// Elements of this entity currently in [`ElementStatus::Created`].
    fn created_elements(&self, core: &EngineCore) -> Vec<(ElementId, Arc<dyn ErasedKey>)>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K: ElementKey, S: EntityState> AnyEntityManager for EntityManager<K, S> {
    fn entity_id(&self) -> EntityId {
        self.entity.id()
    }

    fn is_source(&self) -> bool {
        self.factory.is_none()
    }

    fn dependency_list(&self) -> &[(EntityId, usize)] {
        &self.dependency_list
    }

    fn run(&mut self, core: &EngineCore) {
        let stained: Vec<ElementId> = {
            let graph = core.graph.borrow();
            self.index
                .values()
                .copied()
                .filter(|&id| graph.node(id).notifications > 0)
                .collect()
        };
        for id in stained {
            self.update_element(core, id);
        }
    }

    fn process_event(&mut self, core: &EngineCore, event: &EngineEvent) {
        let Some(factory) = self.factory.as_mut() else {
            return;
        };
        let targets = match factory.on_event(event) {
            NotifySet::None => return,
            NotifySet::Keys(keys) => keys
                .iter()
                .map(|key| self.get_or_create(core, key))
                .collect::<Vec<_>>(),
            NotifySet::All => self.index.values().copied().collect(),
        };
        let mut graph = core.graph.borrow_mut();
        for id in targets {
            if let Some(element) = self.elements.get_mut(&id) {
                element.pending_events.push(event.clone());
            }
            graph.stain(id);
        }
    }

    fn notify_new_upstream(
        &mut self,
        core: &EngineCore,
        upstream: &EntityId,
        key: &dyn ErasedKey,
        node: ElementId,
    ) {
        let Some(factory) = self.factory.as_mut() else {
            return;
        };
        let announced = UpstreamKey {
            entity: upstream,
            key,
        };
        let targets = match factory.on_new_key(&announced) {
            NotifySet::None => return,
            NotifySet::Keys(keys) => keys
                .iter()
                .map(|key| self.get_or_create(core, key))
                .collect::<Vec<_>>(),
            NotifySet::All => self.index.values().copied().collect(),
        };
        let mut graph = core.graph.borrow_mut();
        for id in targets {
            graph.queue_creation(id, node);
        }
    }

    fn flush_creations(&mut self, core: &EngineCore) {
        let ids: Vec<ElementId> = self.index.values().copied().collect();
        for id in ids {
            let pending = core.graph.borrow_mut().take_pending_creations(id);
            if pending.is_empty() {
                continue;
            }
            let Some(element) = self.elements.get_mut(&id) else {
                continue;
            };
            let Some(updater) = element.updater.as_mut() else {
                continue;
            };
            for broadcaster in pending {
                let announcement = crate::toolbox::NewElement::new(core, broadcaster, id);
                if updater.on_new_element(announcement) {
                    core.graph.borrow_mut().stain(id);
                }
            }
        }
    }

    fn created_elements(&self, core: &EngineCore) -> Vec<(ElementId, Arc<dyn ErasedKey>)> {
        let graph = core.graph.borrow();
        self.index
            .values()
            .filter(|&&id| graph.status(id) == ElementStatus::Created)
            .map(|&id| (id, Arc::clone(&graph.node(id).key)))
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
