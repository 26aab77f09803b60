//! Entity Component System (ECS) implementation
//!
//! Per-type slot stores with stable indices, recyclable entity handles and
//! queries kept up to date by lifecycle events.

pub mod component;
pub mod entity;
pub mod event;
pub mod query;
pub mod world;

pub use component::{Component, ComponentId, ComponentRegistry, ComponentStorage, ComponentStore};
pub use entity::{Entity, EntityRegistry};
pub use event::{EngineEvent, EventBus, EventKind, ListenerId};
pub use query::{ComponentTuple, Query, QueryId, QueryIndex};
pub use world::{EntityMut, EntityRef, World};
