//! Engine - owns the world and its systems and drives them tick by tick

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::ecs::{
    Component, ComponentId, ComponentTuple, EngineEvent, Entity, EntityMut, EntityRef, EventKind,
    ListenerId, QueryId, World,
};
use crate::error::EngineError;
use crate::scheduler::{FixedTimestep, Schedule, Scheduled, System, SystemEntry, SystemId};

pub struct EngineBuilder {
    config: EngineConfig,
    world: World,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            world: World::new(),
        }
    }

    pub fn with_component<T: Component>(mut self) -> Self {
        self.world.register_component::<T>();
        self
    }

    pub fn with_factory<T: Component, A: 'static>(mut self, factory: fn(A) -> T) -> Self {
        self.world.register_factory(factory);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        Ok(Engine {
            timestep: FixedTimestep::new(self.config.fixed_interval()),
            world: self.world,
            systems: Vec::new(),
            steps: 0,
            state: StopHandle::idle(),
            config: self.config,
        })
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// Cloneable handle that asks a running engine to stop after the tick in
/// progress, and reports where the run loop is.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicU8>);

impl StopHandle {
    fn idle() -> Self {
        Self(Arc::new(AtomicU8::new(IDLE)))
    }

    /// Has no effect unless a run is in progress.
    pub fn stop(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst) == RUNNING
    }

    pub fn run_state(&self) -> RunState {
        match self.0.load(Ordering::SeqCst) {
            RUNNING => RunState::Running,
            STOPPING => RunState::Stopping,
            _ => RunState::Idle,
        }
    }

    fn set(&self, state: u8) {
        self.0.store(state, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Stop was requested; the current tick is still finishing.
    Stopping,
}

/// Borrow of an engine for the length of one `run` call. If the run future
/// is dropped before the loop ends, stop still fires and the engine goes
/// back to idle.
struct ActiveRun<'e> {
    engine: &'e mut Engine,
    finished: bool,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(steps = self.engine.steps, "run cancelled");
            if let Err(err) = self.engine.fire_stop() {
                warn!(error = %err, "stop callback failed after the run was cancelled");
            }
        }
        self.engine.state.set(IDLE);
    }
}

pub struct Engine {
    world: World,
    systems: Vec<Box<dyn Scheduled>>,
    timestep: FixedTimestep,
    steps: u64,
    state: StopHandle,
    config: EngineConfig,
}

impl Engine {
    /// Engine with the default configuration (60 fixed steps per second).
    pub fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            timestep: FixedTimestep::new(config.fixed_interval()),
            world: World::new(),
            systems: Vec::new(),
            steps: 0,
            state: StopHandle::idle(),
            config,
        }
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.world.register_component::<T>()
    }

    pub fn register_factory<T: Component, A: 'static>(
        &mut self,
        factory: fn(A) -> T,
    ) -> ComponentId {
        self.world.register_factory(factory)
    }

    /// Creates and adds an Entity to the engine.
    pub fn create_entity(&mut self) -> Entity {
        self.world.create_entity()
    }

    pub fn entity(&self, entity: Entity) -> Result<EntityRef<'_>, EngineError> {
        Ok(self.world.entity(entity)?)
    }

    pub fn entity_mut(&mut self, entity: Entity) -> Result<EntityMut<'_>, EngineError> {
        Ok(self.world.entity_mut(entity)?)
    }

    /// Adds a system to the engine. Its component types are resolved here,
    /// so an unregistered or repeated type fails now rather than mid-tick.
    pub fn create_system<S: System>(
        &mut self,
        system: S,
        schedule: Schedule,
    ) -> Result<SystemId, EngineError> {
        let query = self.world.create_query::<S::Components>()?;
        let id = SystemId(self.systems.len());
        debug!(system = system.name(), ?schedule, "registered system");
        self.systems
            .push(Box::new(SystemEntry::new(system, query, schedule)));
        Ok(id)
    }

    pub fn create_query<C: ComponentTuple>(&mut self) -> Result<QueryId, EngineError> {
        Ok(self.world.create_query::<C>()?)
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn system_name(&self, id: SystemId) -> Option<&str> {
        self.systems.get(id.0).map(|system| system.name())
    }

    /// Entities the system would act on if it ran now.
    pub fn system_entities(&self, id: SystemId) -> Vec<Entity> {
        self.systems
            .get(id.0)
            .map(|system| self.world.query_members(system.query()))
            .unwrap_or_default()
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&EngineEvent) + 'static,
    ) -> ListenerId {
        self.world.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.world.off(id)
    }

    /// Runs the engine for a single frame.
    ///
    /// Fixed systems run once for every whole fixed interval banked so far,
    /// variable systems run once, then entities queued for deletion are
    /// released. `steps` goes up by one if the tick completes.
    pub fn update(&mut self, delta: Duration) -> Result<(), EngineError> {
        trace!(step = self.steps, ?delta, "tick");
        self.world.emit(EngineEvent::BeforeAct);

        self.timestep.accumulate(delta);
        while self.timestep.consume() {
            self.step_systems(Schedule::Fixed)?;
        }
        self.step_systems(Schedule::Variable)?;

        self.world.emit(EngineEvent::AfterAct);
        self.world.cleanup();
        self.steps += 1;
        Ok(())
    }

    /// Performs a single step of the engine without advancing time.
    pub fn perform(&mut self) -> Result<(), EngineError> {
        self.update(Duration::ZERO)
    }

    fn step_systems(&mut self, schedule: Schedule) -> Result<(), EngineError> {
        for system in self
            .systems
            .iter_mut()
            .filter(|system| system.schedule() == schedule)
        {
            system.step(&mut self.world)?;
        }
        Ok(())
    }

    /// Runs the engine every `interval` until `max_steps` ticks have run in
    /// this call (0 for no limit) or [`Engine::stop`] is observed.
    ///
    /// Start fires only on the engine's first activation; stop fires every
    /// time the loop ends normally or the future is dropped. A callback
    /// error ends the loop at once and is returned without firing stop.
    pub async fn run(&mut self, interval: Duration, max_steps: u64) -> Result<(), EngineError> {
        self.state.set(RUNNING);
        let mut run = ActiveRun {
            engine: self,
            finished: false,
        };
        let result = run.engine.run_loop(interval, max_steps).await;
        run.finished = true;
        result
    }

    /// [`Engine::run`] with the interval and step budget from the config.
    pub async fn run_configured(&mut self) -> Result<(), EngineError> {
        let run = self.config.run.clone();
        self.run(run.interval(), run.max_steps).await
    }

    async fn run_loop(&mut self, interval: Duration, max_steps: u64) -> Result<(), EngineError> {
        if self.steps == 0 {
            self.fire_start()?;
        }
        debug!(?interval, max_steps, steps = self.steps, "engine running");

        let mut performed = 0;
        let mut last = Instant::now();
        while self.is_active() && (max_steps == 0 || performed < max_steps) {
            tokio::time::sleep(interval).await;
            if !self.is_active() {
                break;
            }
            let now = Instant::now();
            self.update(now - last)?;
            last = now;
            performed += 1;
        }

        debug!(performed, steps = self.steps, "engine stopping");
        self.fire_stop()
    }

    fn fire_start(&mut self) -> Result<(), EngineError> {
        self.world.emit(EngineEvent::Start);
        for system in &mut self.systems {
            system.start(&mut self.world)?;
        }
        Ok(())
    }

    fn fire_stop(&mut self) -> Result<(), EngineError> {
        self.world.emit(EngineEvent::Stop);
        for system in &mut self.systems {
            system.stop(&mut self.world)?;
        }
        Ok(())
    }

    /// Stops the engine's main loop once the current tick is done.
    pub fn stop(&self) {
        self.state.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn run_state(&self) -> RunState {
        self.state.run_state()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn fixed_interval(&self) -> Duration {
        self.timestep.interval()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
