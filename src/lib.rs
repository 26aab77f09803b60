pub mod config;
pub mod ecs;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use config::{EngineConfig, RunConfig};
pub use ecs::{
    Component, ComponentId, ComponentTuple, EngineEvent, Entity, EntityMut, EntityRef, EventKind,
    ListenerId, Query, QueryId, World,
};
pub use engine::{Engine, EngineBuilder, RunState, StopHandle};
pub use error::{ConfigError, EcsError, EngineError, Phase};
pub use scheduler::{FixedTimestep, Schedule, System, SystemId};
