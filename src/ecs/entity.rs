//! Entity handles and the recycling registry

use std::collections::HashMap;
use std::fmt;

use super::ComponentId;

/// Handle to an entity. Only meaningful while the entity is alive; the
/// generation changes every time the index is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Per-index bookkeeping: where each component lives and the entity flags.
#[derive(Debug, Default)]
pub(crate) struct EntityRecord {
    generation: u32,
    alive: bool,
    sequence: u64,
    pub(crate) components: HashMap<ComponentId, usize>,
    pub(crate) dirty: bool,
    pub(crate) marked_for_deletion: bool,
}

impl EntityRecord {
    pub(crate) fn has(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub(crate) fn slot(&self, id: ComponentId) -> Option<usize> {
        self.components.get(&id).copied()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Pool of entity records. Released indices go on a free list and are
/// handed out again, newest first.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    records: Vec<EntityRecord>,
    free_list: Vec<u32>,
    live: usize,
    next_sequence: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate(&mut self) -> Entity {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                self.records.push(EntityRecord::default());
                (self.records.len() - 1) as u32
            }
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let record = &mut self.records[index as usize];
        record.alive = true;
        record.sequence = sequence;
        self.live += 1;

        Entity {
            index,
            generation: record.generation,
        }
    }

    /// Reset the record and return the component slots it held so the
    /// caller can free them in their stores.
    pub(crate) fn deallocate(&mut self, entity: Entity) -> Option<HashMap<ComponentId, usize>> {
        let record = self.record_mut(entity)?;
        let components = std::mem::take(&mut record.components);
        record.dirty = false;
        record.marked_for_deletion = false;
        record.alive = false;
        record.generation = record.generation.wrapping_add(1);

        self.free_list.push(entity.index);
        self.live -= 1;
        Some(components)
    }

    pub(crate) fn record(&self, entity: Entity) -> Option<&EntityRecord> {
        self.records
            .get(entity.index as usize)
            .filter(|record| record.alive && record.generation == entity.generation)
    }

    pub(crate) fn record_mut(&mut self, entity: Entity) -> Option<&mut EntityRecord> {
        self.records
            .get_mut(entity.index as usize)
            .filter(|record| record.alive && record.generation == entity.generation)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.record(entity).is_some()
    }

    pub fn count(&self) -> usize {
        self.live
    }

    /// Live entities in index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.alive)
            .map(|(index, record)| Entity {
                index: index as u32,
                generation: record.generation,
            })
    }

    pub(crate) fn marked_for_deletion(&self) -> Vec<Entity> {
        self.iter()
            .filter(|entity| {
                self.record(*entity)
                    .map_or(false, |record| record.marked_for_deletion)
            })
            .collect()
    }
}
