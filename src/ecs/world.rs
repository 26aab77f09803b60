//! World - central ECS container

use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use tracing::debug;

use super::entity::EntityRegistry;
use super::event::{EngineEvent, EventBus, EventKind, ListenerId};
use super::query::{ComponentTuple, Query, QueryId, QueryIndex};
use super::{Component, ComponentId, ComponentRegistry, Entity};
use crate::error::EcsError;

/// World holds all entities, component stores, queries and listeners.
///
/// Every structural change is applied immediately and announced as an
/// [`EngineEvent`]: queries see it first, then user listeners.
/// Entity deletion is the exception. [`World::queue_free`] only marks the
/// entity, and the engine releases it at the end of the tick.
#[derive(Default)]
pub struct World {
    entities: EntityRegistry,
    components: ComponentRegistry,
    queries: QueryIndex,
    events: EventBus,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component<T: Component>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    pub fn register_factory<T: Component, A: 'static>(
        &mut self,
        factory: fn(A) -> T,
    ) -> ComponentId {
        self.components.register_factory(factory)
    }

    pub fn component_id<T: Component>(&self) -> Result<ComponentId, EcsError> {
        self.components.id::<T>()
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Create a new entity
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.allocate();
        self.emit(EngineEvent::EntityCreated(entity));
        entity
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    pub fn entity(&self, entity: Entity) -> Result<EntityRef<'_>, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        Ok(EntityRef {
            world: self,
            entity,
        })
    }

    pub fn entity_mut(&mut self, entity: Entity) -> Result<EntityMut<'_>, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        Ok(EntityMut {
            world: self,
            entity,
        })
    }

    /// Attach `component`. Fails with [`EcsError::DuplicateComponent`] if the
    /// entity already holds a `T`; the existing value is kept.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<(), EcsError> {
        let id = self.components.id::<T>()?;
        let record = self
            .entities
            .record_mut(entity)
            .ok_or(EcsError::DeadEntity(entity))?;
        if record.has(id) {
            return Err(EcsError::DuplicateComponent {
                entity,
                component: type_name::<T>(),
            });
        }
        let store = self
            .components
            .storage_mut::<T>()
            .ok_or_else(|| EcsError::unregistered(type_name::<T>()))?;
        record.components.insert(id, store.add(component));
        record.dirty = true;

        self.emit(EngineEvent::ComponentAdded {
            entity,
            component: id,
        });
        Ok(())
    }

    /// Build a `T` with its registered factory and attach it.
    pub fn construct_component<T: Component, A: 'static>(
        &mut self,
        entity: Entity,
        args: A,
    ) -> Result<(), EcsError> {
        let component = self.components.construct::<T, A>(args)?;
        self.add_component(entity, component)
    }

    /// Detach `T`. Removing a component the entity does not hold is a no-op.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        let id = self.components.id::<T>()?;
        let record = self
            .entities
            .record_mut(entity)
            .ok_or(EcsError::DeadEntity(entity))?;
        let Some(slot) = record.components.remove(&id) else {
            return Ok(());
        };
        record.dirty = true;
        if let Some(store) = self.components.storage_dyn_mut(id) {
            store.remove(slot);
        }

        self.emit(EngineEvent::ComponentRemoved {
            entity,
            component: id,
        });
        Ok(())
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        let Ok(id) = self.components.id::<T>() else {
            return false;
        };
        self.entities
            .record(entity)
            .map_or(false, |record| record.has(id))
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<Ref<'_, T>, EcsError> {
        self.slot_cell::<T>(entity)?
            .try_borrow()
            .map_err(|_| EcsError::BorrowConflict {
                component: type_name::<T>(),
            })
    }

    pub fn get_component_mut<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<RefMut<'_, T>, EcsError> {
        self.slot_cell::<T>(entity)?
            .try_borrow_mut()
            .map_err(|_| EcsError::BorrowConflict {
                component: type_name::<T>(),
            })
    }

    fn slot_cell<T: Component>(&self, entity: Entity) -> Result<&RefCell<T>, EcsError> {
        let slot = self.slot_of::<T>(entity)?;
        self.components
            .storage::<T>()
            .and_then(|store| store.get(slot))
            .ok_or(EcsError::NotFound {
                entity,
                component: type_name::<T>(),
            })
    }

    pub(crate) fn cell<T: Component>(&self, entity: Entity) -> Result<Rc<RefCell<T>>, EcsError> {
        let slot = self.slot_of::<T>(entity)?;
        self.components
            .storage::<T>()
            .and_then(|store| store.cell(slot))
            .ok_or(EcsError::NotFound {
                entity,
                component: type_name::<T>(),
            })
    }

    fn slot_of<T: Component>(&self, entity: Entity) -> Result<usize, EcsError> {
        let id = self.components.id::<T>()?;
        self.entities
            .record(entity)
            .ok_or(EcsError::DeadEntity(entity))?
            .slot(id)
            .ok_or(EcsError::NotFound {
                entity,
                component: type_name::<T>(),
            })
    }

    /// Mark for release at the end of the current tick. The entity stays
    /// fully usable until then.
    pub fn queue_free(&mut self, entity: Entity) -> Result<(), EcsError> {
        let record = self
            .entities
            .record_mut(entity)
            .ok_or(EcsError::DeadEntity(entity))?;
        record.marked_for_deletion = true;
        Ok(())
    }

    pub fn is_dirty(&self, entity: Entity) -> bool {
        self.entities
            .record(entity)
            .map_or(false, |record| record.dirty)
    }

    pub fn clear_dirty(&mut self, entity: Entity) -> Result<(), EcsError> {
        let record = self
            .entities
            .record_mut(entity)
            .ok_or(EcsError::DeadEntity(entity))?;
        record.dirty = false;
        Ok(())
    }

    pub fn is_marked_for_deletion(&self, entity: Entity) -> bool {
        self.entities
            .record(entity)
            .map_or(false, |record| record.marked_for_deletion)
    }

    /// Release one entity: free its component slots, recycle its index and
    /// announce it. Returns false for a dead handle.
    pub(crate) fn release(&mut self, entity: Entity) -> bool {
        let Some(components) = self.entities.deallocate(entity) else {
            return false;
        };
        for (id, slot) in components {
            if let Some(store) = self.components.storage_dyn_mut(id) {
                store.remove(slot);
            }
        }
        self.emit(EngineEvent::EntityReleased(entity));
        true
    }

    /// Release every entity marked with [`World::queue_free`].
    pub(crate) fn cleanup(&mut self) -> usize {
        let mut released = 0;
        for entity in self.entities.marked_for_deletion() {
            if self.release(entity) {
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, live = self.entities.count(), "released queued entities");
        }
        released
    }

    /// Create a query over `C`. Every type must be registered and appear
    /// only once. Existing entities are matched immediately.
    pub fn create_query<C: ComponentTuple>(&mut self) -> Result<QueryId, EcsError> {
        let required = C::resolve(&self.components)?;
        for (i, id) in required.iter().enumerate() {
            if required[..i].contains(id) {
                return Err(EcsError::InvalidTypeIdentifier {
                    component: self.components.name(*id).unwrap_or("<unknown>"),
                    reason: "component type listed more than once",
                });
            }
        }
        Ok(self.queries.create(required, &self.entities))
    }

    pub fn query(&self, id: QueryId) -> Option<&Query> {
        self.queries.get(id)
    }

    /// Current members of a query, in the order they joined.
    pub fn query_members(&self, id: QueryId) -> Vec<Entity> {
        self.queries
            .get(id)
            .map(|query| query.entities().collect())
            .unwrap_or_default()
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&EngineEvent) + 'static,
    ) -> ListenerId {
        self.events.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    pub(crate) fn emit(&mut self, event: EngineEvent) {
        self.queries.handle(&event, &self.entities);
        self.events.emit(&event);
    }
}

/// Read-only view of one live entity.
pub struct EntityRef<'w> {
    world: &'w World,
    entity: Entity,
}

impl<'w> EntityRef<'w> {
    pub fn id(&self) -> Entity {
        self.entity
    }

    pub fn has<T: Component>(&self) -> bool {
        self.world.has_component::<T>(self.entity)
    }

    pub fn get<T: Component>(&self) -> Result<Ref<'w, T>, EcsError> {
        self.world.get_component::<T>(self.entity)
    }

    pub fn is_dirty(&self) -> bool {
        self.world.is_dirty(self.entity)
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.world.is_marked_for_deletion(self.entity)
    }
}

/// Mutable handle to one live entity; the builder-style entity surface.
///
/// ```ignore
/// world.entity_mut(e)?.add(Position { x: 5.0, y: 6.0 })?.add(Velocity { dx: 3.0, dy: 1.0 })?;
/// ```
pub struct EntityMut<'w> {
    world: &'w mut World,
    entity: Entity,
}

impl<'w> EntityMut<'w> {
    pub fn id(&self) -> Entity {
        self.entity
    }

    pub fn add<T: Component>(&mut self, component: T) -> Result<&mut Self, EcsError> {
        self.world.add_component(self.entity, component)?;
        Ok(self)
    }

    pub fn add_with<T: Component, A: 'static>(&mut self, args: A) -> Result<&mut Self, EcsError> {
        self.world.construct_component::<T, A>(self.entity, args)?;
        Ok(self)
    }

    pub fn remove<T: Component>(&mut self) -> Result<&mut Self, EcsError> {
        self.world.remove_component::<T>(self.entity)?;
        Ok(self)
    }

    pub fn has<T: Component>(&self) -> bool {
        self.world.has_component::<T>(self.entity)
    }

    pub fn get<T: Component>(&self) -> Result<Ref<'_, T>, EcsError> {
        self.world.get_component::<T>(self.entity)
    }

    pub fn get_mut<T: Component>(&mut self) -> Result<RefMut<'_, T>, EcsError> {
        self.world.get_component_mut::<T>(self.entity)
    }

    pub fn queue_free(&mut self) -> &mut Self {
        if let Some(record) = self.world.entities.record_mut(self.entity) {
            record.marked_for_deletion = true;
        }
        self
    }

    pub fn clear_dirty(&mut self) -> &mut Self {
        if let Some(record) = self.world.entities.record_mut(self.entity) {
            record.dirty = false;
        }
        self
    }

    pub fn is_dirty(&self) -> bool {
        self.world.is_dirty(self.entity)
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.world.is_marked_for_deletion(self.entity)
    }
}
