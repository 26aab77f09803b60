//! Scheduler - system trait, per-system stepping and the fixed timestep

use std::any::type_name;
use std::time::Duration;

use anyhow::Result;

use crate::ecs::{ComponentTuple, Entity, QueryId, World};
use crate::error::{EngineError, Phase};

/// Behaviour run every tick over the entities holding `Components`.
///
/// Every callback may change the world structurally; those changes apply
/// immediately. References handed to `act` are only valid for that call.
pub trait System: 'static {
    type Components: ComponentTuple;

    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// Runs once per step, before any `act`.
    fn before(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn act(
        &mut self,
        _world: &mut World,
        _entity: Entity,
        _components: <Self::Components as ComponentTuple>::Item<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once per step, after every `act`.
    fn after(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn on_start(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn on_stop(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }
}

/// Whether a system runs in the accumulator-gated fixed phase or once per
/// update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    Fixed,
    #[default]
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) usize);

/// Object-safe face of a registered system.
pub(crate) trait Scheduled {
    fn name(&self) -> &str;
    fn schedule(&self) -> Schedule;
    fn query(&self) -> QueryId;
    fn step(&mut self, world: &mut World) -> Result<(), EngineError>;
    fn start(&mut self, world: &mut World) -> Result<(), EngineError>;
    fn stop(&mut self, world: &mut World) -> Result<(), EngineError>;
}

pub(crate) struct SystemEntry<S: System> {
    system: S,
    query: QueryId,
    schedule: Schedule,
}

impl<S: System> SystemEntry<S> {
    pub(crate) fn new(system: S, query: QueryId, schedule: Schedule) -> Self {
        Self {
            system,
            query,
            schedule,
        }
    }
}

impl<S: System> Scheduled for SystemEntry<S> {
    fn name(&self) -> &str {
        self.system.name()
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn query(&self) -> QueryId {
        self.query
    }

    /// `before`, then `act` for each member, then `after`. Members are
    /// walked live in join order: an entity that stops matching before it
    /// is reached is skipped, one that starts matching mid-step is visited
    /// in this same step.
    fn step(&mut self, world: &mut World) -> Result<(), EngineError> {
        let Self { system, query, .. } = self;

        system
            .before(world)
            .map_err(|source| EngineError::callback(system.name(), Phase::Before, source))?;

        let mut cursor = 0;
        while let Some((stamp, entity)) = world
            .query(*query)
            .and_then(|members| members.next_member(cursor))
        {
            cursor = stamp + 1;
            let cells = <S::Components as ComponentTuple>::cells(world, entity)?;
            let acted = <S::Components as ComponentTuple>::with_borrowed(&cells, |components| {
                system.act(world, entity, components)
            })?;
            acted.map_err(|source| EngineError::callback(system.name(), Phase::Act, source))?;
        }

        system
            .after(world)
            .map_err(|source| EngineError::callback(system.name(), Phase::After, source))
    }

    fn start(&mut self, world: &mut World) -> Result<(), EngineError> {
        self.system
            .on_start(world)
            .map_err(|source| EngineError::callback(self.system.name(), Phase::Start, source))
    }

    fn stop(&mut self, world: &mut World) -> Result<(), EngineError> {
        self.system
            .on_stop(world)
            .map_err(|source| EngineError::callback(self.system.name(), Phase::Stop, source))
    }
}

/// Time accumulator for fixed-rate steps. Works in whole nanoseconds, so the
/// number of steps only depends on the total time fed in, not on how it
/// was split across calls.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    interval: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            accumulator: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulator
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator = self.accumulator.saturating_add(delta);
    }

    /// Take one interval out of the accumulator if enough time is banked.
    pub fn consume(&mut self) -> bool {
        if self.interval.is_zero() || self.accumulator < self.interval {
            return false;
        }
        self.accumulator -= self.interval;
        true
    }
}
