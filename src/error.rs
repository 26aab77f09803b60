//! Error types for the ECS runtime and the engine loop

use std::fmt;

use thiserror::Error;

use crate::ecs::Entity;

/// Structural errors. These are local to the call that raised them and the
/// world is left unchanged.
#[derive(Debug, Error)]
pub enum EcsError {
    #[error("component `{component}` not found on entity {entity}")]
    NotFound {
        entity: Entity,
        component: &'static str,
    },

    #[error("invalid component type `{component}`: {reason}")]
    InvalidTypeIdentifier {
        component: &'static str,
        reason: &'static str,
    },

    #[error("entity {entity} already has component `{component}`")]
    DuplicateComponent {
        entity: Entity,
        component: &'static str,
    },

    #[error("entity {0} is not alive")]
    DeadEntity(Entity),

    #[error("component `{component}` is already borrowed")]
    BorrowConflict { component: &'static str },
}

impl EcsError {
    pub(crate) fn unregistered(component: &'static str) -> Self {
        EcsError::InvalidTypeIdentifier {
            component,
            reason: "type is not registered with this world",
        }
    }
}

/// The callback a [`EngineError::CallbackFailure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    Act,
    After,
    Start,
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Before => "before",
            Phase::Act => "act",
            Phase::After => "after",
            Phase::Start => "on_start",
            Phase::Stop => "on_stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ecs(#[from] EcsError),

    #[error("system `{system}` failed in {phase}")]
    CallbackFailure {
        system: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn callback(system: &str, phase: Phase, source: anyhow::Error) -> Self {
        EngineError::CallbackFailure {
            system: system.to_string(),
            phase,
            source,
        }
    }

    /// True when the error came out of a user callback.
    pub fn is_callback_failure(&self) -> bool {
        matches!(self, EngineError::CallbackFailure { .. })
    }
}
