//! Declaration of an engine's entities and channels.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::assemble::assemble;
use crate::engine::Engine;
use crate::error::BuildError;
use crate::factory::{ChannelFactory, ElementFactory};
use crate::key::{ChannelId, ElementKey, EntityId, EntityKey, EntityState, EventChannel};
use crate::manager::{AnyEntityManager, EntityManager};

/// One registered entity, held until assembly. The constructor closure
/// defers manager construction until the entity's position in the
/// topological order is known.
pub(crate) struct EntityDecl {
    pub(crate) id: EntityId,
    pub(crate) source: bool,
    pub(crate) dependencies: Vec<EntityId>,
    pub(crate) channels: Vec<ChannelId>,
    #[allow(clippy::type_complexity)]
    pub(crate) construct:
        Box<dyn FnOnce(usize, Vec<(EntityId, usize)>) -> RefCell<Box<dyn AnyEntityManager>>>,
}

/// Collects entity and channel declarations; [`build`](EngineBuilder::build)
/// validates them and assembles an [`Engine`].
///
/// Registration order is preserved: it breaks ties in the topological order,
/// so two builds of the same declarations produce identically ordered
/// engines.
#[derive(Default)]
pub struct EngineBuilder {
    pub(crate) entities: Vec<EntityDecl>,
    pub(crate) channels: Vec<ChannelId>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an event channel. Entities listening on a channel must name
    /// one registered here.
    pub fn register_channel<E: Send + Sync + 'static>(mut self, channel: &EventChannel<E>) -> Self {
        self.channels.push(channel.id());
        self
    }

    /// Declare a source entity: its elements take externally pushed values
    /// and have no computation of their own.
    pub fn register_source<K: ElementKey, S: EntityState>(
        mut self,
        entity: &EntityKey<K, S>,
    ) -> Self {
        let key = entity.clone();
        self.entities.push(EntityDecl {
            id: entity.id(),
            source: true,
            dependencies: Vec::new(),
            channels: Vec::new(),
            construct: Box::new(move |position, _| {
                RefCell::new(Box::new(EntityManager::new_source(key, position)))
            }),
        });
        self
    }

    /// Declare an inner entity: its elements are computed by updaters built
    /// by `factory`, reading the named dependencies and listening on the
    /// named channels.
    pub fn register_entity<K: ElementKey, S: EntityState>(
        mut self,
        entity: &EntityKey<K, S>,
        factory: impl ElementFactory<K, S>,
        dependencies: Vec<EntityId>,
        channels: Vec<ChannelId>,
    ) -> Self {
        let key = entity.clone();
        self.entities.push(EntityDecl {
            id: entity.id(),
            source: false,
            dependencies,
            channels,
            construct: Box::new(move |position, dependency_list| {
                RefCell::new(Box::new(EntityManager::new_inner(
                    key,
                    position,
                    Box::new(factory),
                    dependency_list,
                )))
            }),
        });
        self
    }

    /// Declare an entity that mirrors an event channel: each event maps to a
    /// key and a state, and the element for that key takes the state of the
    /// latest event.
    pub fn register_channel_entity<E, K, S, FK, FS>(
        self,
        entity: &EntityKey<K, S>,
        channel: &EventChannel<E>,
        key_fn: FK,
        state_fn: FS,
    ) -> Self
    where
        E: Send + Sync + 'static,
        K: ElementKey,
        S: EntityState,
        FK: Fn(&E) -> K + Send + 'static,
        FS: Fn(&E) -> S + Send + Sync + 'static,
    {
        let factory = ChannelFactory::new(channel.clone(), key_fn, state_fn);
        self.register_entity(entity, factory, Vec::new(), vec![channel.id()])
    }

    /// Validate the declarations and assemble the engine.
    pub fn build(self) -> Result<Engine, BuildError> {
        let (managers, by_id, channels) = assemble(self)?;
        Ok(Engine::assembled(managers, by_id, channels))
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field(
                "entities",
                &self.entities.iter().map(|e| e.id.name()).collect::<Vec<_>>(),
            )
            .field(
                "channels",
                &self.channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

pub(crate) type AssembledParts = (
    Vec<RefCell<Box<dyn AnyEntityManager>>>,
    HashMap<EntityId, usize>,
    HashMap<ChannelId, Vec<usize>>,
);
