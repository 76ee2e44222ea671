//! Assembly validation and engine-level guard rails.

use std::time::{Duration, SystemTime};

use entity_flow::{
    BuildError, ElementFactory, ElementUpdater, Engine, EngineError, EntityKey, EventChannel,
    Toolbox, UpdateContext, UpdateResult,
};

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Factory whose updaters never produce anything; enough to satisfy
/// registration.
struct InertFactory;

impl ElementFactory<String, f64> for InertFactory {
    fn create(&mut self, _key: &String, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<f64>> {
        Box::new(InertUpdater)
    }
}

struct InertUpdater;

impl ElementUpdater<f64> for InertUpdater {
    fn update(
        &mut self,
        _previous: Option<&f64>,
        _ctx: &UpdateContext,
        _toolbox: &Toolbox<'_>,
    ) -> anyhow::Result<UpdateResult<f64>> {
        Ok(UpdateResult::NotReady)
    }
}

fn source() -> EntityKey<String, f64> {
    EntityKey::new("SOURCE")
}

#[test]
fn duplicate_entities_are_rejected() {
    let result = Engine::builder()
        .register_source(&source())
        .register_source(&source())
        .build();
    assert!(matches!(result, Err(BuildError::DuplicateEntity { .. })));
}

#[test]
fn duplicate_channels_are_rejected() {
    let channel: EventChannel<u32> = EventChannel::new("C");
    let result = Engine::builder()
        .register_channel(&channel)
        .register_channel(&channel)
        .register_source(&source())
        .build();
    assert!(matches!(result, Err(BuildError::DuplicateChannel { .. })));
}

#[test]
fn missing_dependencies_are_rejected() {
    let inner: EntityKey<String, f64> = EntityKey::new("INNER");
    let result = Engine::builder()
        .register_entity(&inner, InertFactory, vec![source().id()], vec![])
        .build();
    assert!(matches!(result, Err(BuildError::MissingDependency { .. })));
}

#[test]
fn unknown_channels_are_rejected() {
    let channel: EventChannel<u32> = EventChannel::new("C");
    let inner: EntityKey<String, f64> = EntityKey::new("INNER");
    let result = Engine::builder()
        .register_source(&source())
        .register_entity(&inner, InertFactory, vec![source().id()], vec![channel.id()])
        .build();
    assert!(matches!(result, Err(BuildError::UnknownChannel { .. })));
}

#[test]
fn inner_entities_without_inputs_are_rejected() {
    let inner: EntityKey<String, f64> = EntityKey::new("INNER");
    let result = Engine::builder()
        .register_source(&source())
        .register_entity(&inner, InertFactory, vec![], vec![])
        .build();
    assert!(matches!(result, Err(BuildError::NoInputs { .. })));
}

#[test]
fn dependency_cycles_are_rejected() {
    let a: EntityKey<String, f64> = EntityKey::new("A");
    let b: EntityKey<String, f64> = EntityKey::new("B");
    let result = Engine::builder()
        .register_entity(&a, InertFactory, vec![b.id()], vec![])
        .register_entity(&b, InertFactory, vec![a.id()], vec![])
        .build();
    match result {
        Err(BuildError::DependencyCycle { entities }) => {
            assert_eq!(entities, vec!["A".to_owned(), "B".to_owned()]);
        }
        other => panic!("expected a dependency cycle, got {:?}", other.err()),
    }
}

#[test]
fn diamond_graphs_assemble_and_run() {
    // SOURCE feeds LEFT and RIGHT, both feeding JOIN; assembly must place
    // JOIN after both.
    let left: EntityKey<String, f64> = EntityKey::new("LEFT");
    let right: EntityKey<String, f64> = EntityKey::new("RIGHT");
    let join: EntityKey<String, f64> = EntityKey::new("JOIN");
    let mut engine = Engine::builder()
        .register_entity(&join, InertFactory, vec![left.id(), right.id()], vec![])
        .register_entity(&left, InertFactory, vec![source().id()], vec![])
        .register_entity(&right, InertFactory, vec![source().id()], vec![])
        .register_source(&source())
        .build()
        .unwrap();
    engine.run_once_at(at(100)).unwrap();
}

#[test]
fn cycle_times_must_not_regress() {
    let mut engine = Engine::builder().register_source(&source()).build().unwrap();
    engine.run_once_at(at(100)).unwrap();
    // Equal times are fine; the cycle id still advances.
    let ctx = engine.run_once_at(at(100)).unwrap();
    assert_eq!(ctx.update_id(), 2);
    assert!(matches!(
        engine.run_once_at(at(99)),
        Err(EngineError::TimeRegression { .. })
    ));
}

#[test]
fn sources_are_the_only_settable_entities() {
    let inner: EntityKey<String, f64> = EntityKey::new("INNER");
    let mut engine = Engine::builder()
        .register_source(&source())
        .register_entity(&inner, InertFactory, vec![source().id()], vec![])
        .build()
        .unwrap();

    assert!(matches!(
        engine.set_state(&inner, "k".to_owned(), 1.0),
        Err(EngineError::NotASource { .. })
    ));

    let stranger: EntityKey<String, f64> = EntityKey::new("STRANGER");
    assert!(matches!(
        engine.set_state(&stranger, "k".to_owned(), 1.0),
        Err(EngineError::UnknownEntity { .. })
    ));
    assert!(matches!(
        engine.get_element(&stranger, &"k".to_owned()),
        Err(EngineError::UnknownEntity { .. })
    ));
}
