//! Entity-Flow: an embeddable engine for incremental recomputation of keyed
//! entity graphs.
//!
//! An engine holds a fixed set of *entities*, each a family of keyed
//! *elements* sharing one computation rule. Entities declare which other
//! entities they read; assembly sorts them into dependency order, and each
//! evaluation cycle re-evaluates exactly the elements something touched,
//! upstream before downstream.
//!
//! # Key Features
//!
//! - **Keyed incrementality**: Elements come and go per key at runtime;
//!   only stained elements recompute, and unchanged results cut
//!   propagation short.
//! - **Lazy creation**: Reading a dependency's element creates it on the
//!   fly, and factories can materialize downstream keys in reaction to
//!   upstream ones appearing.
//! - **Graded subscriptions**: Strong, optional, and weak subscriptions
//!   separate "wake me on change" from "block me until ready".
//! - **External inputs**: Source entities take pushed values, channels
//!   carry injected events, and timers wake elements at chosen times.
//! - **Deterministic cycles**: The caller drives the clock; each
//!   `run_once_at` is one stamped, reproducible propagation pass.
//!
//! # Example
//!
//! ```ignore
//! use entity_flow::{Engine, EntityKey, UpdateResult};
//!
//! let price: EntityKey<String, f64> = EntityKey::new("PRICE");
//! let mut engine = Engine::builder().register_source(&price).build()?;
//!
//! engine.set_state(&price, "ACME".to_owned(), 41.5)?;
//! engine.run_once()?;
//! assert_eq!(engine.get_state(&price, &"ACME".to_owned())?.as_deref(), Some(&41.5));
//! ```

mod assemble;
mod builder;
mod context;
mod element;
mod engine;
mod error;
mod event;
mod factory;
mod graph;
mod key;
mod manager;
mod timer;
mod toolbox;

pub use builder::EngineBuilder;
pub use context::UpdateContext;
pub use element::{ElementStatus, ElementUpdater, ElementView, SubscriptionType, UpdateResult};
pub use engine::Engine;
pub use error::{BuildError, EngineError};
pub use event::EngineEvent;
pub use factory::{ChannelFactory, ElementFactory, NotifySet, UpstreamKey};
pub use key::{ChannelId, ElementKey, EntityId, EntityKey, EntityState, ErasedKey, EventChannel};
pub use timer::{ElementTimer, TimerState};
pub use toolbox::{ElementHandle, NewElement, Toolbox};
