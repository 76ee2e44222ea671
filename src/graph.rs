//! The bookkeeping graph shared by all entities.
//!
//! Typed element state lives in the per-entity managers; everything the
//! engine needs to reason about across entity boundaries (status,
//! notification counters, subscription edges, change stamps) lives here, in
//! one slab indexed by [`ElementId`]. Edges are index pairs, so the graph
//! owns no cycles and drops trivially.

use std::sync::Arc;

use slab::Slab;

use crate::context::UpdateContext;
use crate::element::{ElementStatus, SubscriptionType};
use crate::key::ErasedKey;

/// Index of an element's slot in the graph. Slots are never reclaimed;
/// deletion is a status change.
pub(crate) type ElementId = usize;

/// Aggregate readiness of an element's strong inputs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Readiness {
    /// Every strong input is `Ok` (or there are none).
    Ready,
    /// Some strong input is not `Ok` yet; evaluation waits.
    Blocked,
    /// Some strong input is failed; the failure propagates.
    Failed,
}

pub(crate) struct ElementNode {
    /// Index of the owning entity's manager.
    pub(crate) entity: usize,
    /// The element's key, erased for cross-entity use.
    pub(crate) key: Arc<dyn ErasedKey>,
    pub(crate) status: ElementStatus,
    /// How many times the element was stained since its last evaluation.
    pub(crate) notifications: u32,
    /// Stamp of the cycle that last changed the element.
    pub(crate) update_context: UpdateContext,
    /// Failure recorded at the last evaluation, if it errored.
    pub(crate) fault: Option<Arc<anyhow::Error>>,
    /// Inputs of this element, with the strength of each relation. Holds
    /// every live relation including weak ones.
    broadcasters: Vec<(ElementId, SubscriptionType)>,
    /// Elements to stain when this one changes. Strong and optional
    /// relations only; weak subscribers are deliberately absent.
    subscribers: Vec<ElementId>,
    /// Upstream elements created this cycle, queued for the announcement
    /// pass.
    pending_creations: Vec<ElementId>,
}

pub(crate) struct ElementGraph {
    nodes: Slab<ElementNode>,
}

impl ElementGraph {
    pub(crate) fn new() -> Self {
        Self { nodes: Slab::new() }
    }

    pub(crate) fn insert(&mut self, entity: usize, key: Arc<dyn ErasedKey>) -> ElementId {
        self.nodes.insert(ElementNode {
            entity,
            key,
            status: ElementStatus::Shadow,
            notifications: 0,
            update_context: UpdateContext::none(),
            fault: None,
            broadcasters: Vec::new(),
            subscribers: Vec::new(),
            pending_creations: Vec::new(),
        })
    }

    pub(crate) fn node(&self, id: ElementId) -> &ElementNode {
        &self.nodes[id]
    }

    pub(crate) fn status(&self, id: ElementId) -> ElementStatus {
        self.nodes[id].status
    }

    pub(crate) fn set_status(&mut self, id: ElementId, status: ElementStatus) {
        self.nodes[id].status = status;
    }

    /// Set the status and report whether it actually changed.
    pub(crate) fn replace_status(&mut self, id: ElementId, status: ElementStatus) -> bool {
        let node = &mut self.nodes[id];
        let changed = node.status != status;
        node.status = status;
        changed
    }

    pub(crate) fn record_fault(&mut self, id: ElementId, fault: Arc<anyhow::Error>) {
        self.nodes[id].fault = Some(fault);
    }

    pub(crate) fn clear_fault(&mut self, id: ElementId) {
        self.nodes[id].fault = None;
    }

    /// Bump the element's notification counter so the next cycle evaluates
    /// it.
    pub(crate) fn stain(&mut self, id: ElementId) {
        self.nodes[id].notifications += 1;
    }

    pub(crate) fn reset_notifications(&mut self, id: ElementId) {
        self.nodes[id].notifications = 0;
    }

    /// Record that the element changed in the cycle stamped `ctx` and stain
    /// its staining subscribers.
    pub(crate) fn mark_changed(&mut self, id: ElementId, ctx: UpdateContext) {
        self.nodes[id].update_context = ctx;
        let subscribers = self.nodes[id].subscribers.clone();
        for subscriber in subscribers {
            self.nodes[subscriber].notifications += 1;
        }
    }

    /// Install or adjust the relation between `broadcaster` and `subscriber`.
    ///
    /// The subscriber's broadcaster list keeps every live relation (weak
    /// included) so readiness and announcements can see them; the
    /// broadcaster's subscriber list keeps only staining relations.
    pub(crate) fn set_subscription(
        &mut self,
        broadcaster: ElementId,
        subscriber: ElementId,
        subscription: SubscriptionType,
    ) {
        let list = &mut self.nodes[subscriber].broadcasters;
        let entry = list.iter().position(|(b, _)| *b == broadcaster);
        match (subscription, entry) {
            (SubscriptionType::None, Some(at)) => {
                list.remove(at);
            }
            (SubscriptionType::None, None) => {}
            (s, Some(at)) => list[at].1 = s,
            (s, None) => list.push((broadcaster, s)),
        }

        let subscribers = &mut self.nodes[broadcaster].subscribers;
        let entry = subscribers.iter().position(|&s| s == subscriber);
        match (subscription.stains(), entry) {
            (true, None) => subscribers.push(subscriber),
            (false, Some(at)) => {
                subscribers.remove(at);
            }
            _ => {}
        }
    }

    /// The current strength of the relation, [`SubscriptionType::None`] if
    /// absent.
    pub(crate) fn subscription(
        &self,
        broadcaster: ElementId,
        subscriber: ElementId,
    ) -> SubscriptionType {
        self.nodes[subscriber]
            .broadcasters
            .iter()
            .find(|(b, _)| *b == broadcaster)
            .map(|&(_, s)| s)
            .unwrap_or(SubscriptionType::None)
    }

    /// Aggregate the element's strong inputs. A failed input wins over a
    /// merely unready one.
    pub(crate) fn readiness(&self, id: ElementId) -> Readiness {
        let mut blocked = false;
        for &(broadcaster, subscription) in &self.nodes[id].broadcasters {
            if subscription != SubscriptionType::Strong {
                continue;
            }
            let status = self.nodes[broadcaster].status;
            if status.is_failed() {
                return Readiness::Failed;
            }
            if !status.is_ok() {
                blocked = true;
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    /// Queue an upstream creation for announcement to `subscriber`.
    /// Duplicate announcements of the same broadcaster collapse.
    pub(crate) fn queue_creation(&mut self, subscriber: ElementId, broadcaster: ElementId) {
        let pending = &mut self.nodes[subscriber].pending_creations;
        if !pending.contains(&broadcaster) {
            pending.push(broadcaster);
        }
    }

    pub(crate) fn take_pending_creations(&mut self, id: ElementId) -> Vec<ElementId> {
        std::mem::take(&mut self.nodes[id].pending_creations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(n: usize) -> ElementGraph {
        let mut graph = ElementGraph::new();
        for i in 0..n {
            graph.insert(0, Arc::new(i));
        }
        graph
    }

    #[test]
    fn staining_follows_strong_and_optional_edges_only() {
        let mut graph = graph_with(4);
        graph.set_subscription(0, 1, SubscriptionType::Strong);
        graph.set_subscription(0, 2, SubscriptionType::Optional);
        graph.set_subscription(0, 3, SubscriptionType::Weak);

        graph.mark_changed(0, UpdateContext::none().next(std::time::SystemTime::UNIX_EPOCH));
        assert_eq!(graph.node(1).notifications, 1);
        assert_eq!(graph.node(2).notifications, 1);
        assert_eq!(graph.node(3).notifications, 0);
    }

    #[test]
    fn none_severs_an_existing_subscription() {
        let mut graph = graph_with(2);
        graph.set_subscription(0, 1, SubscriptionType::Strong);
        assert_eq!(graph.subscription(0, 1), SubscriptionType::Strong);

        graph.set_subscription(0, 1, SubscriptionType::None);
        assert_eq!(graph.subscription(0, 1), SubscriptionType::None);
        graph.mark_changed(0, UpdateContext::none().next(std::time::SystemTime::UNIX_EPOCH));
        assert_eq!(graph.node(1).notifications, 0);
    }

    #[test]
    fn downgrading_to_weak_stops_staining_but_keeps_the_edge() {
        let mut graph = graph_with(2);
        graph.set_subscription(0, 1, SubscriptionType::Strong);
        graph.set_subscription(0, 1, SubscriptionType::Weak);

        graph.mark_changed(0, UpdateContext::none().next(std::time::SystemTime::UNIX_EPOCH));
        assert_eq!(graph.node(1).notifications, 0);
        assert_eq!(graph.subscription(0, 1), SubscriptionType::Weak);
    }

    #[test]
    fn readiness_aggregates_strong_inputs() {
        let mut graph = graph_with(4);
        graph.set_subscription(0, 3, SubscriptionType::Strong);
        graph.set_subscription(1, 3, SubscriptionType::Strong);
        graph.set_subscription(2, 3, SubscriptionType::Optional);

        // Nothing evaluated yet: blocked.
        assert_eq!(graph.readiness(3), Readiness::Blocked);

        graph.set_status(0, ElementStatus::Ok);
        graph.set_status(1, ElementStatus::Ok);
        // The optional input stays unevaluated; it must not block.
        assert_eq!(graph.readiness(3), Readiness::Ready);

        graph.set_status(1, ElementStatus::Error);
        assert_eq!(graph.readiness(3), Readiness::Failed);

        // A failed upstream-of-upstream also poisons.
        graph.set_status(1, ElementStatus::UpstreamError);
        assert_eq!(graph.readiness(3), Readiness::Failed);
    }

    #[test]
    fn queued_creations_deduplicate() {
        let mut graph = graph_with(2);
        graph.queue_creation(1, 0);
        graph.queue_creation(1, 0);
        assert_eq!(graph.take_pending_creations(1), vec![0]);
        assert!(graph.take_pending_creations(1).is_empty());
    }
}
