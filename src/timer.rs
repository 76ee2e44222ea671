//! Per-element timers.
//!
//! A timer is a one-shot wake-up: when an evaluation cycle runs at or past
//! the timer's expiry, the owning element is stained and the timer flips to
//! [`TimerState::Triggered`]. Timers never drive the clock; they only react
//! to the times passed into `run_once_at`.

use std::collections::BTreeMap;
use std::time::SystemTime;

use slab::Slab;

use crate::error::EngineError;
use crate::graph::{ElementGraph, ElementId};

/// Lifecycle of a timer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerState {
    /// Pending; will stain its element at the first cycle at or past its
    /// expiry.
    Ready,
    /// Expired and consumed.
    Triggered,
    /// Cancelled before triggering.
    Cancelled,
}

/// Handle to a timer created through the toolbox. Cheap to copy; the engine
/// owns the timer itself.
#[derive(Clone, Copy, Debug)]
pub struct ElementTimer {
    id: usize,
    at: SystemTime,
}

impl ElementTimer {
    /// The expiry the timer was created with.
    pub fn at(&self) -> SystemTime {
        self.at
    }
}

struct TimerEntry {
    element: ElementId,
    state: TimerState,
}

/// All timers of an engine: a slab of entries plus an expiry-ordered index
/// of the pending ones.
pub(crate) struct TimerStore {
    entries: Slab<TimerEntry>,
    pending: BTreeMap<SystemTime, Vec<usize>>,
}

impl TimerStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Register a timer for `element`. The expiry must be strictly after the
    /// current cycle time.
    pub(crate) fn create(
        &mut self,
        element: ElementId,
        at: SystemTime,
        now: SystemTime,
    ) -> Result<ElementTimer, EngineError> {
        if at <= now {
            return Err(EngineError::TimerInPast { at, now });
        }
        let id = self.entries.insert(TimerEntry {
            element,
            state: TimerState::Ready,
        });
        self.pending.entry(at).or_default().push(id);
        Ok(ElementTimer { id, at })
    }

    pub(crate) fn cancel(&mut self, timer: &ElementTimer) -> Result<(), EngineError> {
        let entry = self
            .entries
            .get_mut(timer.id)
            .ok_or(EngineError::UnknownTimer)?;
        if entry.state != TimerState::Ready {
            return Err(EngineError::TimerNotPending { state: entry.state });
        }
        entry.state = TimerState::Cancelled;
        if let Some(slot) = self.pending.get_mut(&timer.at) {
            slot.retain(|&id| id != timer.id);
            if slot.is_empty() {
                self.pending.remove(&timer.at);
            }
        }
        Ok(())
    }

    pub(crate) fn state(&self, timer: &ElementTimer) -> Result<TimerState, EngineError> {
        self.entries
            .get(timer.id)
            .map(|entry| entry.state)
            .ok_or(EngineError::UnknownTimer)
    }

    /// Trigger every pending timer with expiry at or before `limit`, staining
    /// the owning elements. Returns how many fired.
    pub(crate) fn notify_next(&mut self, limit: SystemTime, graph: &mut ElementGraph) -> usize {
        let due: Vec<SystemTime> = self
            .pending
            .range(..=limit)
            .map(|(at, _)| *at)
            .collect();
        let mut fired = 0;
        for at in due {
            let Some(ids) = self.pending.remove(&at) else {
                continue;
            };
            for id in ids {
                let entry = &mut self.entries[id];
                entry.state = TimerState::Triggered;
                graph.stain(entry.element);
                fired += 1;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn timers_fire_once_at_or_after_expiry() {
        let mut graph = ElementGraph::new();
        let element = graph.insert(0, Arc::new("k"));
        let mut store = TimerStore::new();
        let timer = store.create(element, at(110), at(100)).unwrap();

        assert_eq!(store.notify_next(at(105), &mut graph), 0);
        assert_eq!(store.state(&timer).unwrap(), TimerState::Ready);

        assert_eq!(store.notify_next(at(110), &mut graph), 1);
        assert_eq!(store.state(&timer).unwrap(), TimerState::Triggered);
        assert_eq!(graph.node(element).notifications, 1);

        // Already consumed; a later cycle fires nothing.
        assert_eq!(store.notify_next(at(200), &mut graph), 0);
        assert_eq!(graph.node(element).notifications, 1);
    }

    #[test]
    fn expiry_must_be_strictly_in_the_future() {
        let mut graph = ElementGraph::new();
        let element = graph.insert(0, Arc::new("k"));
        let mut store = TimerStore::new();
        assert!(matches!(
            store.create(element, at(100), at(100)),
            Err(EngineError::TimerInPast { .. })
        ));
    }

    #[test]
    fn cancelled_timers_do_not_fire_and_cannot_cancel_twice() {
        let mut graph = ElementGraph::new();
        let element = graph.insert(0, Arc::new("k"));
        let mut store = TimerStore::new();
        let timer = store.create(element, at(110), at(100)).unwrap();

        store.cancel(&timer).unwrap();
        assert_eq!(store.state(&timer).unwrap(), TimerState::Cancelled);
        assert!(matches!(
            store.cancel(&timer),
            Err(EngineError::TimerNotPending { .. })
        ));
        assert_eq!(store.notify_next(at(200), &mut graph), 0);
        assert_eq!(graph.node(element).notifications, 0);
    }
}
