//! Timers wake elements at cycle times chosen by their updaters.

use std::time::{Duration, SystemTime};

use entity_flow::{
    ElementFactory, ElementTimer, ElementUpdater, Engine, EngineError, EntityKey, EventChannel,
    NotifySet, TimerState, Toolbox, UpdateContext, UpdateResult,
};

fn arm() -> EventChannel<String> {
    EventChannel::new("ARM")
}

fn alarm() -> EntityKey<String, u32> {
    EntityKey::new("ALARM")
}

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

struct AlarmFactory {
    delay: Duration,
}

impl ElementFactory<String, u32> for AlarmFactory {
    fn create(&mut self, _key: &String, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<u32>> {
        Box::new(AlarmUpdater {
            delay: self.delay,
            pending: None,
        })
    }

    fn on_event(&mut self, event: &entity_flow::EngineEvent) -> NotifySet<String> {
        match event.value_of(&arm()) {
            Some(name) => NotifySet::key((*name).clone()),
            None => NotifySet::None,
        }
    }
}

/// Counts timer expiries. Each arming event (or expiry) schedules the next
/// wake-up `delay` after the current cycle.
struct AlarmUpdater {
    delay: Duration,
    pending: Option<ElementTimer>,
}

impl ElementUpdater<u32> for AlarmUpdater {
    fn update(
        &mut self,
        previous: Option<&u32>,
        ctx: &UpdateContext,
        toolbox: &Toolbox<'_>,
    ) -> anyhow::Result<UpdateResult<u32>> {
        let fired = match &self.pending {
            Some(timer) => toolbox.timer_state(timer)? == TimerState::Triggered,
            None => false,
        };
        self.pending = Some(toolbox.set_timer(ctx.time() + self.delay)?);
        let count = previous.copied().unwrap_or(0) + u32::from(fired);
        Ok(UpdateResult::Updated(count))
    }
}

fn build_engine(delay: Duration) -> Engine {
    Engine::builder()
        .register_channel(&arm())
        .register_entity(&alarm(), AlarmFactory { delay }, vec![], vec![arm().id()])
        .build()
        .unwrap()
}

#[test]
fn timers_fire_at_the_first_cycle_past_their_expiry() {
    let mut engine = build_engine(Duration::from_secs(10));
    let key = "wake".to_owned();

    engine.inject_event(&arm(), key.clone()).unwrap();
    engine.run_once_at(at(100)).unwrap();
    assert_eq!(engine.get_state(&alarm(), &key).unwrap().as_deref(), Some(&0));

    // Not due yet; the element is not even woken.
    engine.run_once_at(at(105)).unwrap();
    assert_eq!(engine.get_state(&alarm(), &key).unwrap().as_deref(), Some(&0));

    // Due at 110; the cycle at 112 triggers it and the updater re-arms.
    engine.run_once_at(at(112)).unwrap();
    assert_eq!(engine.get_state(&alarm(), &key).unwrap().as_deref(), Some(&1));

    engine.run_once_at(at(122)).unwrap();
    assert_eq!(engine.get_state(&alarm(), &key).unwrap().as_deref(), Some(&2));
}

#[test]
fn cancelled_timers_never_wake_their_element() {
    struct OneShotFactory;

    impl ElementFactory<String, u32> for OneShotFactory {
        fn create(&mut self, _key: &String, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<u32>> {
            Box::new(OneShotUpdater { runs: 0 })
        }

        fn on_event(&mut self, event: &entity_flow::EngineEvent) -> NotifySet<String> {
            match event.value_of(&arm()) {
                Some(name) => NotifySet::key((*name).clone()),
                None => NotifySet::None,
            }
        }
    }

    /// Sets a timer and cancels it in the same call; also checks that an
    /// expiry at the current cycle time is rejected.
    struct OneShotUpdater {
        runs: u32,
    }

    impl ElementUpdater<u32> for OneShotUpdater {
        fn update(
            &mut self,
            _previous: Option<&u32>,
            ctx: &UpdateContext,
            toolbox: &Toolbox<'_>,
        ) -> anyhow::Result<UpdateResult<u32>> {
            self.runs += 1;
            assert!(toolbox.set_timer(ctx.time()).is_err());

            let timer = toolbox.set_timer(ctx.time() + Duration::from_secs(5))?;
            assert_eq!(toolbox.timer_state(&timer)?, TimerState::Ready);
            toolbox.cancel_timer(&timer)?;
            assert_eq!(toolbox.timer_state(&timer)?, TimerState::Cancelled);
            assert!(toolbox.cancel_timer(&timer).is_err());

            Ok(UpdateResult::Updated(self.runs))
        }
    }

    let oneshot: EntityKey<String, u32> = EntityKey::new("ONESHOT");
    let mut engine = Engine::builder()
        .register_channel(&arm())
        .register_entity(&oneshot, OneShotFactory, vec![], vec![arm().id()])
        .build()
        .unwrap();

    let key = "once".to_owned();
    engine.inject_event(&arm(), key.clone()).unwrap();
    engine.run_once_at(at(100)).unwrap();
    assert_eq!(engine.get_state(&oneshot, &key).unwrap().as_deref(), Some(&1));

    // The cancelled timer would have been due here.
    engine.run_once_at(at(110)).unwrap();
    assert_eq!(engine.get_state(&oneshot, &key).unwrap().as_deref(), Some(&1));
}

#[test]
fn triggered_timers_cannot_be_cancelled() {
    struct LapseFactory;

    impl ElementFactory<String, u32> for LapseFactory {
        fn create(&mut self, _key: &String, _ctx: &UpdateContext) -> Box<dyn ElementUpdater<u32>> {
            Box::new(LapseUpdater { pending: None })
        }

        fn on_event(&mut self, event: &entity_flow::EngineEvent) -> NotifySet<String> {
            match event.value_of(&arm()) {
                Some(name) => NotifySet::key((*name).clone()),
                None => NotifySet::None,
            }
        }
    }

    /// Arms once, then checks that a timer that already fired rejects a late
    /// cancellation with its actual state.
    struct LapseUpdater {
        pending: Option<ElementTimer>,
    }

    impl ElementUpdater<u32> for LapseUpdater {
        fn update(
            &mut self,
            previous: Option<&u32>,
            ctx: &UpdateContext,
            toolbox: &Toolbox<'_>,
        ) -> anyhow::Result<UpdateResult<u32>> {
            if let Some(timer) = self.pending.take() {
                assert_eq!(toolbox.timer_state(&timer)?, TimerState::Triggered);
                match toolbox.cancel_timer(&timer) {
                    Err(EngineError::TimerNotPending { state }) => {
                        assert_eq!(state, TimerState::Triggered);
                    }
                    other => panic!("expected a not-pending error, got {other:?}"),
                }
                Ok(UpdateResult::Updated(previous.copied().unwrap_or(0) + 1))
            } else {
                self.pending = Some(toolbox.set_timer(ctx.time() + Duration::from_secs(5))?);
                Ok(UpdateResult::Updated(previous.copied().unwrap_or(0)))
            }
        }
    }

    let lapse: EntityKey<String, u32> = EntityKey::new("LAPSE");
    let mut engine = Engine::builder()
        .register_channel(&arm())
        .register_entity(&lapse, LapseFactory, vec![], vec![arm().id()])
        .build()
        .unwrap();

    let key = "late".to_owned();
    engine.inject_event(&arm(), key.clone()).unwrap();
    engine.run_once_at(at(100)).unwrap();
    assert_eq!(engine.get_state(&lapse, &key).unwrap().as_deref(), Some(&0));

    // Proves the triggered branch, with its failing cancel, actually ran.
    engine.run_once_at(at(106)).unwrap();
    assert_eq!(engine.get_state(&lapse, &key).unwrap().as_deref(), Some(&1));
}
