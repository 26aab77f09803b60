//! Component storage: one dense slot array per component type

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::EcsError;

/// Trait for components
pub trait Component: 'static {}

/// Token assigned to a component type when it is registered with a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type-erased component storage
pub trait ComponentStorage {
    /// Empty the slot at `index` and make it available for reuse.
    fn remove(&mut self, index: usize) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Dense array of component slots with a free list. Indices handed out by
/// `add` stay put until the slot is removed; nothing is ever compacted.
pub struct ComponentStore<T: Component> {
    slots: Vec<Option<Rc<RefCell<T>>>>,
    free_list: Vec<usize>,
}

impl<T: Component> ComponentStore<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub fn add(&mut self, component: T) -> usize {
        let cell = Some(Rc::new(RefCell::new(component)));
        if let Some(index) = self.free_list.pop() {
            self.slots[index] = cell;
            return index;
        }
        self.slots.push(cell);
        self.slots.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&RefCell<T>> {
        self.slots.get(index)?.as_deref()
    }

    /// Shared handle to a slot, kept alive by a running system even if the
    /// slot is emptied underneath it.
    pub(crate) fn cell(&self, index: usize) -> Option<Rc<RefCell<T>>> {
        self.slots.get(index)?.clone()
    }

    /// Total slots ever allocated, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free_list.len()
    }
}

impl<T: Component> Default for ComponentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ComponentStorage for ComponentStore<T> {
    fn remove(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free_list.push(index);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ComponentInfo {
    name: &'static str,
    storage: Box<dyn ComponentStorage>,
    // fn(A) -> T, erased
    factory: Option<Box<dyn Any>>,
}

/// Maps component types to their ids and owns one store per type.
#[derive(Default)]
pub struct ComponentRegistry {
    ids: HashMap<TypeId, ComponentId>,
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, returning its id. Registering twice returns the same id.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        if let Some(id) = self.ids.get(&TypeId::of::<T>()) {
            return *id;
        }
        let id = ComponentId(self.infos.len() as u32);
        self.infos.push(ComponentInfo {
            name: type_name::<T>(),
            storage: Box::new(ComponentStore::<T>::new()),
            factory: None,
        });
        self.ids.insert(TypeId::of::<T>(), id);
        id
    }

    /// Register `T` together with the constructor used by
    /// [`ComponentRegistry::construct`]. A later call replaces the factory.
    pub fn register_factory<T: Component, A: 'static>(
        &mut self,
        factory: fn(A) -> T,
    ) -> ComponentId {
        let id = self.register::<T>();
        self.infos[id.0 as usize].factory = Some(Box::new(factory));
        id
    }

    pub fn id<T: Component>(&self) -> Result<ComponentId, EcsError> {
        self.id_of(TypeId::of::<T>())
            .ok_or_else(|| EcsError::unregistered(type_name::<T>()))
    }

    pub fn id_of(&self, type_id: TypeId) -> Option<ComponentId> {
        self.ids.get(&type_id).copied()
    }

    pub fn name(&self, id: ComponentId) -> Option<&'static str> {
        self.infos.get(id.0 as usize).map(|info| info.name)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn storage<T: Component>(&self) -> Option<&ComponentStore<T>> {
        let id = self.id_of(TypeId::of::<T>())?;
        self.infos[id.0 as usize]
            .storage
            .as_any()
            .downcast_ref::<ComponentStore<T>>()
    }

    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStore<T>> {
        let id = self.id_of(TypeId::of::<T>())?;
        self.infos[id.0 as usize]
            .storage
            .as_any_mut()
            .downcast_mut::<ComponentStore<T>>()
    }

    pub(crate) fn storage_dyn_mut(
        &mut self,
        id: ComponentId,
    ) -> Option<&mut (dyn ComponentStorage + 'static)> {
        self.infos
            .get_mut(id.0 as usize)
            .map(|info| info.storage.as_mut())
    }

    /// Build a `T` through its registered factory.
    pub fn construct<T: Component, A: 'static>(&self, args: A) -> Result<T, EcsError> {
        let id = self.id::<T>()?;
        let factory = self.infos[id.0 as usize]
            .factory
            .as_ref()
            .ok_or(EcsError::InvalidTypeIdentifier {
                component: type_name::<T>(),
                reason: "no factory registered",
            })?;
        let factory = factory
            .downcast_ref::<fn(A) -> T>()
            .ok_or(EcsError::InvalidTypeIdentifier {
                component: type_name::<T>(),
                reason: "factory takes different arguments",
            })?;
        Ok(factory(args))
    }
}
