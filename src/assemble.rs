//! Validation and topological assembly of an engine's declarations.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::builder::{AssembledParts, EngineBuilder};
use crate::error::BuildError;

/// Validate the builder's declarations and construct the managers in
/// dependency order.
///
/// The order is a Kahn sort that always picks the earliest-registered entity
/// among those whose dependencies are all placed, so assembly is
/// deterministic for a given registration sequence. A cycle leaves entities
/// unplaced and fails the build.
pub(crate) fn assemble(builder: EngineBuilder) -> Result<AssembledParts, BuildError> {
    let EngineBuilder { entities, channels } = builder;

    let mut channel_names = HashSet::new();
    for channel in &channels {
        if !channel_names.insert(channel.clone()) {
            return Err(BuildError::DuplicateChannel {
                name: channel.name().to_owned(),
            });
        }
    }

    let mut ids = HashSet::new();
    for decl in &entities {
        if !ids.insert(decl.id.clone()) {
            return Err(BuildError::DuplicateEntity {
                name: decl.id.name().to_owned(),
            });
        }
    }

    for decl in &entities {
        for dependency in &decl.dependencies {
            if !ids.contains(dependency) {
                return Err(BuildError::MissingDependency {
                    entity: decl.id.name().to_owned(),
                    dependency: dependency.name().to_owned(),
                });
            }
        }
        for channel in &decl.channels {
            if !channel_names.contains(channel) {
                return Err(BuildError::UnknownChannel {
                    entity: decl.id.name().to_owned(),
                    channel: channel.name().to_owned(),
                });
            }
        }
        // A source with no inputs is fine (it is fed externally); an inner
        // entity with none could never be stained.
        if !decl.source && decl.dependencies.is_empty() && decl.channels.is_empty() {
            return Err(BuildError::NoInputs {
                entity: decl.id.name().to_owned(),
            });
        }
    }

    // Kahn sort, scanning declarations in registration order each round.
    let mut placed: HashSet<usize> = HashSet::new();
    let mut order: Vec<usize> = Vec::with_capacity(entities.len());
    let position_of: HashMap<_, _> = entities
        .iter()
        .enumerate()
        .map(|(at, decl)| (decl.id.clone(), at))
        .collect();
    while order.len() < entities.len() {
        let mut progressed = false;
        for (at, decl) in entities.iter().enumerate() {
            if placed.contains(&at) {
                continue;
            }
            let ready = decl
                .dependencies
                .iter()
                .all(|dependency| placed.contains(&position_of[dependency]));
            if ready {
                placed.insert(at);
                order.push(at);
                progressed = true;
            }
        }
        if !progressed {
            let unplaced = entities
                .iter()
                .enumerate()
                .filter(|(at, _)| !placed.contains(at))
                .map(|(_, decl)| decl.id.name().to_owned())
                .collect();
            return Err(BuildError::DependencyCycle { entities: unplaced });
        }
    }

    let assembled_order: HashMap<_, _> = order
        .iter()
        .enumerate()
        .map(|(position, &at)| (entities[at].id.clone(), position))
        .collect();

    let mut managers = Vec::with_capacity(entities.len());
    let mut by_id = HashMap::new();
    let mut channel_listeners: HashMap<_, Vec<usize>> = HashMap::new();

    let mut declarations: Vec<_> = entities.into_iter().map(Some).collect();
    for (position, &at) in order.iter().enumerate() {
        let Some(decl) = declarations[at].take() else {
            continue;
        };
        debug!(entity = decl.id.name(), position, "assembling entity");
        let dependency_list: Vec<_> = decl
            .dependencies
            .iter()
            .map(|dependency| (dependency.clone(), assembled_order[dependency]))
            .collect();
        for channel in &decl.channels {
            channel_listeners
                .entry(channel.clone())
                .or_default()
                .push(position);
        }
        by_id.insert(decl.id.clone(), position);
        managers.push((decl.construct)(position, dependency_list));
    }

    Ok((managers, by_id, channel_listeners))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EngineBuilder;
    use crate::context::UpdateContext;
    use crate::element::{ElementUpdater, UpdateResult};
    use crate::factory::ElementFactory;
    use crate::key::EntityKey;
    use crate::toolbox::Toolbox;

    struct Inert;

    impl ElementFactory<String, u32> for Inert {
        fn create(&mut self, _key: &String, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<u32>> {
            Box::new(InertUpdater)
        }
    }

    struct InertUpdater;

    impl ElementUpdater<u32> for InertUpdater {
        fn update(
            &mut self,
            _previous: Option<&u32>,
            _ctx: &UpdateContext,
            _toolbox: &Toolbox<'_>,
        ) -> anyhow::Result<UpdateResult<u32>> {
            Ok(UpdateResult::NotReady)
        }
    }

    #[test]
    fn order_is_topological_and_deterministic_by_registration() {
        let a: EntityKey<String, u32> = EntityKey::new("A");
        let b: EntityKey<String, u32> = EntityKey::new("B");
        let c: EntityKey<String, u32> = EntityKey::new("C");
        let d: EntityKey<String, u32> = EntityKey::new("D");

        let builder = EngineBuilder::new()
            .register_entity(&d, Inert, vec![a.id(), c.id()], vec![])
            .register_entity(&c, Inert, vec![b.id()], vec![])
            .register_source(&b)
            .register_source(&a);
        let (managers, by_id, _) = assemble(builder).unwrap();

        // Each round places ready entities in registration order: B and A
        // first (B was registered earlier), then C, then D.
        let names: Vec<String> = managers
            .iter()
            .map(|m| m.borrow().entity_id().name().to_owned())
            .collect();
        assert_eq!(names, vec!["B", "A", "C", "D"]);
        assert_eq!(by_id[&d.id()], 3);
    }
}
