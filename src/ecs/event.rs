//! Lifecycle events and the per-world listener bus

use std::collections::HashMap;

use super::{ComponentId, Entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EntityCreated,
    EntityReleased,
    ComponentAdded,
    ComponentRemoved,
    Start,
    Stop,
    BeforeAct,
    AfterAct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    EntityCreated(Entity),
    EntityReleased(Entity),
    ComponentAdded {
        entity: Entity,
        component: ComponentId,
    },
    ComponentRemoved {
        entity: Entity,
        component: ComponentId,
    },
    Start,
    Stop,
    BeforeAct,
    AfterAct,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::EntityCreated(_) => EventKind::EntityCreated,
            EngineEvent::EntityReleased(_) => EventKind::EntityReleased,
            EngineEvent::ComponentAdded { .. } => EventKind::ComponentAdded,
            EngineEvent::ComponentRemoved { .. } => EventKind::ComponentRemoved,
            EngineEvent::Start => EventKind::Start,
            EngineEvent::Stop => EventKind::Stop,
            EngineEvent::BeforeAct => EventKind::BeforeAct,
            EngineEvent::AfterAct => EventKind::AfterAct,
        }
    }

    pub fn entity(&self) -> Option<Entity> {
        match *self {
            EngineEvent::EntityCreated(entity)
            | EngineEvent::EntityReleased(entity)
            | EngineEvent::ComponentAdded { entity, .. }
            | EngineEvent::ComponentRemoved { entity, .. } => Some(entity),
            _ => None,
        }
    }
}

/// Returned by [`EventBus::on`]; pass it to [`EventBus::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&EngineEvent)>;

/// Synchronous publish/subscribe. Listeners for a kind run in the order
/// they subscribed.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&EngineEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        for listeners in self.listeners.values_mut() {
            if let Some(pos) = listeners.iter().position(|(existing, _)| *existing == id) {
                drop(listeners.remove(pos));
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: &EngineEvent) {
        if let Some(listeners) = self.listeners.get_mut(&event.kind()) {
            for (_, listener) in listeners.iter_mut() {
                listener(event);
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }
}
