//! Identity types for entities and event channels.

use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Convenience trait for types usable as element keys.
///
/// Automatically implemented for all types that implement
/// `Clone + Eq + Hash + Debug + Send + Sync + 'static`.
pub trait ElementKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> ElementKey for T {}

/// Convenience trait for types usable as element state.
///
/// `PartialEq` backs the value-equality check behind
/// [`UpdateResult::Maybe`](crate::UpdateResult::Maybe).
pub trait EntityState: PartialEq + Debug + Send + Sync + 'static {}
impl<T: PartialEq + Debug + Send + Sync + 'static> EntityState for T {}

/// Object-safe view of an element key, used where keys of different entities
/// flow through the same code path (the bookkeeping graph, creation
/// announcements).
pub trait ErasedKey: Any + Debug + Send + Sync {
    /// Get the key as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Debug + Send + Sync> ErasedKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased identity of an entity: its unique name plus the `TypeId`s of
/// its key and state types.
///
/// Two entity keys address the same entity iff their `EntityId`s are equal,
/// so a lookup under the right name but the wrong types simply misses.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EntityId {
    name: Arc<str>,
    key_type: TypeId,
    state_type: TypeId,
}

impl EntityId {
    /// The entity's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.name)
    }
}

/// Typed identifier for a family of keyed elements sharing one computation
/// rule.
///
/// The type parameters let the compiler enforce key/state agreement at every
/// call site; the erased [`EntityId`] is what the engine uses internally as a
/// map key. Entity keys are plain values: cloning one or constructing an
/// equal one elsewhere addresses the same entity.
pub struct EntityKey<K, S> {
    id: EntityId,
    _marker: PhantomData<fn() -> (K, S)>,
}

impl<K: ElementKey, S: EntityState> EntityKey<K, S> {
    /// Create an entity key. The name must be unique within an engine.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: EntityId {
                name: name.into(),
                key_type: TypeId::of::<K>(),
                state_type: TypeId::of::<S>(),
            },
            _marker: PhantomData,
        }
    }

    /// The entity's unique name.
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The erased identity, for use in dependency declarations.
    pub fn id(&self) -> EntityId {
        self.id.clone()
    }

    /// Borrowed form of [`EntityKey::id`].
    pub fn erased(&self) -> &EntityId {
        &self.id
    }
}

impl<K, S> Clone for EntityKey<K, S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, S> PartialEq for EntityKey<K, S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K, S> Eq for EntityKey<K, S> {}

impl<K, S> Hash for EntityKey<K, S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K, S> Debug for EntityKey<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self.id.name)
    }
}

/// Type-erased identity of an event channel: name plus event value type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    name: Arc<str>,
    event_type: TypeId,
}

impl ChannelId {
    /// The channel's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.name)
    }
}

/// Typed identifier for a kind of external event.
///
/// Identity works like [`EntityKey`]: equality by name plus event value type.
pub struct EventChannel<E> {
    id: ChannelId,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Send + Sync + 'static> EventChannel<E> {
    /// Create an event channel. The name must be unique within an engine.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: ChannelId {
                name: name.into(),
                event_type: TypeId::of::<E>(),
            },
            _marker: PhantomData,
        }
    }

    /// The channel's unique name.
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The erased identity, for use in channel declarations.
    pub fn id(&self) -> ChannelId {
        self.id.clone()
    }

    /// Borrowed form of [`EventChannel::id`].
    pub fn erased(&self) -> &ChannelId {
        &self.id
    }
}

impl<E> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> PartialEq for EventChannel<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for EventChannel<E> {}

impl<E> Hash for EventChannel<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<E> Debug for EventChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventChannel({})", self.id.name)
    }
}
