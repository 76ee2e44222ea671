//! Element lifecycle: status, update results, and the updater trait.

use std::sync::Arc;

use crate::context::UpdateContext;
use crate::key::{ElementKey, EntityState};
use crate::toolbox::{NewElement, Toolbox};

/// Lifecycle status of an element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ElementStatus {
    /// Allocated for bookkeeping only; no updater exists yet. The transient
    /// initial status of a freshly allocated element, promoted to `Created`
    /// before the allocating call returns.
    Shadow,
    /// Materialized this cycle but not yet evaluated. Used as the trigger for
    /// creation propagation.
    Created,
    /// Evaluated, but a strong dependency was not ready. No state.
    NotReady,
    /// Evaluated successfully; state is present.
    Ok,
    /// The updater failed. No state.
    Error,
    /// A strong dependency is failed. The updater was not consulted.
    UpstreamError,
    /// Logically removed. The slot is kept so late readers observe the
    /// deletion instead of a stale value.
    Deleted,
}

impl ElementStatus {
    /// Whether state may be read in this status.
    pub fn is_ok(&self) -> bool {
        matches!(self, ElementStatus::Ok)
    }

    /// Whether this status poisons strong subscribers downstream.
    pub fn is_failed(&self) -> bool {
        matches!(self, ElementStatus::Error | ElementStatus::UpstreamError)
    }
}

/// How an element relates to one of its inputs.
///
/// The strength decides two independent things: whether a change of the input
/// wakes the element (staining), and whether the input's non-`Ok` status
/// blocks or poisons the element (readiness aggregation).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SubscriptionType {
    /// Stains on change; a non-`Ok` input blocks evaluation and a failed
    /// input poisons it. The default for dependency reads.
    Strong,
    /// Stains on change, but the input's status never blocks evaluation.
    Optional,
    /// No staining and no blocking; the element merely remembers the input
    /// so it can read it when woken by something else.
    Weak,
    /// Severs the relation entirely.
    None,
}

impl SubscriptionType {
    /// Whether a change of the broadcaster wakes the subscriber.
    pub fn stains(&self) -> bool {
        matches!(self, SubscriptionType::Strong | SubscriptionType::Optional)
    }
}

/// What an updater decided about its element.
pub enum UpdateResult<S> {
    /// New state; always counts as changed, even if equal to the previous
    /// value.
    Updated(S),
    /// New state; counts as changed only if it differs from the previous
    /// value by `PartialEq`. Use for cheap-to-compare states to cut
    /// propagation short.
    Maybe(S),
    /// Remove the element. Its slot stays, with status
    /// [`ElementStatus::Deleted`].
    Delete,
    /// The element could not compute yet; try again when something stains it.
    NotReady,
    /// Nothing changed. Only valid for elements already in `Ok`.
    Nothing,
    /// The updater failed for a reason it can name.
    Error(anyhow::Error),
    /// Explicitly propagate an upstream failure.
    UpstreamError,
}

impl<S> UpdateResult<S> {
    pub(crate) fn map_state<T>(self, f: impl FnOnce(S) -> T) -> UpdateResult<T> {
        match self {
            UpdateResult::Updated(s) => UpdateResult::Updated(f(s)),
            UpdateResult::Maybe(s) => UpdateResult::Maybe(f(s)),
            UpdateResult::Delete => UpdateResult::Delete,
            UpdateResult::NotReady => UpdateResult::NotReady,
            UpdateResult::Nothing => UpdateResult::Nothing,
            UpdateResult::Error(e) => UpdateResult::Error(e),
            UpdateResult::UpstreamError => UpdateResult::UpstreamError,
        }
    }
}

/// The computation rule of a single element.
///
/// One updater instance exists per materialized element and lives as long as
/// the element does, so it may carry its own incremental bookkeeping between
/// cycles.
pub trait ElementUpdater<S>: Send + 'static {
    /// Recompute the element's state.
    ///
    /// Called once per cycle in which the element was stained, with the
    /// previous state (if the element was `Ok`) and a [`Toolbox`] for reading
    /// dependencies, pending events, and timers. Returning `Err` marks the
    /// element failed, same as [`UpdateResult::Error`].
    fn update(
        &mut self,
        previous: Option<&S>,
        ctx: &UpdateContext,
        toolbox: &Toolbox<'_>,
    ) -> anyhow::Result<UpdateResult<S>>;

    /// Called when an upstream element this element was told about comes into
    /// existence, before any updates run this cycle. Return `true` to stain
    /// this element. The default ignores the announcement.
    fn on_new_element(&mut self, element: NewElement<'_>) -> bool {
        let _ = element;
        false
    }
}

/// A point-in-time snapshot of one element, as returned by element queries on
/// the engine.
#[derive(Clone, Debug)]
pub struct ElementView<K, S> {
    /// The element's key.
    pub key: K,
    /// Lifecycle status at the time of the query.
    pub status: ElementStatus,
    /// Current state; present iff `status` is [`ElementStatus::Ok`].
    pub state: Option<Arc<S>>,
    /// Stamp of the cycle that last changed the element.
    pub update_context: UpdateContext,
    /// The failure behind an [`ElementStatus::Error`] status, if any.
    pub fault: Option<Arc<anyhow::Error>>,
}

impl<K: ElementKey, S: EntityState> ElementView<K, S> {
    /// Current state, or `default` when the element is not `Ok`.
    pub fn state_or(&self, default: S) -> Arc<S> {
        match &self.state {
            Some(state) => Arc::clone(state),
            None => Arc::new(default),
        }
    }
}
