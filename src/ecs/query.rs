//! Queries: incrementally maintained sets of entities holding a fixed
//! tuple of component types.
//!
//! A query never rescans the world during a tick. The world forwards
//! structural events to [`QueryIndex::handle`], which re-tests only the
//! entity named by the event, and only against queries that require the
//! component the event names.

use std::any::type_name;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::entity::{EntityRecord, EntityRegistry};
use super::event::EngineEvent;
use super::{Component, ComponentId, ComponentRegistry, Entity, World};
use crate::error::EcsError;

/// A tuple of component types a system or query requires.
///
/// Implemented for `()` and tuples of up to eight components. `Item` is the
/// tuple of mutable references handed to [`crate::System::act`].
pub trait ComponentTuple: 'static {
    type Cells;
    type Item<'a>;

    fn resolve(registry: &ComponentRegistry) -> Result<Vec<ComponentId>, EcsError>;

    fn cells(world: &World, entity: Entity) -> Result<Self::Cells, EcsError>;

    fn with_borrowed<R, Func>(cells: &Self::Cells, f: Func) -> Result<R, EcsError>
    where
        Func: for<'a> FnOnce(Self::Item<'a>) -> R;
}

macro_rules! impl_component_tuple {
    ($($name:ident),*) => {
        impl<$($name: Component),*> ComponentTuple for ($($name,)*) {
            type Cells = ($(Rc<RefCell<$name>>,)*);
            type Item<'a> = ($(&'a mut $name,)*);

            #[allow(unused_variables)]
            fn resolve(registry: &ComponentRegistry) -> Result<Vec<ComponentId>, EcsError> {
                Ok(vec![$(registry.id::<$name>()?),*])
            }

            #[allow(unused_variables)]
            fn cells(world: &World, entity: Entity) -> Result<Self::Cells, EcsError> {
                Ok(($(world.cell::<$name>(entity)?,)*))
            }

            #[allow(non_snake_case, unused_mut)]
            fn with_borrowed<R, Func>(cells: &Self::Cells, f: Func) -> Result<R, EcsError>
            where
                Func: for<'a> FnOnce(Self::Item<'a>) -> R,
            {
                let ($($name,)*) = cells;
                $(
                    let mut $name = $name.try_borrow_mut().map_err(|_| EcsError::BorrowConflict {
                        component: type_name::<$name>(),
                    })?;
                )*
                Ok(f(($(&mut *$name,)*)))
            }
        }
    };
}

impl_component_tuple!();
impl_component_tuple!(A);
impl_component_tuple!(A, B);
impl_component_tuple!(A, B, C);
impl_component_tuple!(A, B, C, D);
impl_component_tuple!(A, B, C, D, E);
impl_component_tuple!(A, B, C, D, E, F);
impl_component_tuple!(A, B, C, D, E, F, G);
impl_component_tuple!(A, B, C, D, E, F, G, H);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) usize);

/// Membership set for one required-type tuple. Members are kept in the
/// order they joined, so iteration is reproducible and an entity that
/// joins while the set is being walked is reached by that same walk.
#[derive(Debug)]
pub struct Query {
    required: Vec<ComponentId>,
    members: BTreeMap<u64, Entity>,
    stamps: HashMap<Entity, u64>,
    next_stamp: u64,
}

impl Query {
    fn new(required: Vec<ComponentId>) -> Self {
        Self {
            required,
            members: BTreeMap::new(),
            stamps: HashMap::new(),
            next_stamp: 0,
        }
    }

    pub fn required(&self) -> &[ComponentId] {
        &self.required
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.stamps.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.members.values().copied()
    }

    /// First member whose join stamp is at least `cursor`, with its stamp.
    pub(crate) fn next_member(&self, cursor: u64) -> Option<(u64, Entity)> {
        self.members
            .range(cursor..)
            .next()
            .map(|(stamp, entity)| (*stamp, *entity))
    }

    fn matches(&self, record: &EntityRecord) -> bool {
        self.required.iter().all(|id| record.has(*id))
    }

    fn refresh(&mut self, entity: Entity, record: Option<&EntityRecord>) {
        match record {
            Some(record) if self.matches(record) => {
                if !self.stamps.contains_key(&entity) {
                    let stamp = self.next_stamp;
                    self.next_stamp += 1;
                    self.stamps.insert(entity, stamp);
                    self.members.insert(stamp, entity);
                }
            }
            _ => self.evict(entity),
        }
    }

    fn evict(&mut self, entity: Entity) {
        if let Some(stamp) = self.stamps.remove(&entity) {
            self.members.remove(&stamp);
        }
    }
}

/// All queries of one world plus the component -> query routing table.
#[derive(Debug, Default)]
pub struct QueryIndex {
    queries: Vec<Query>,
    by_component: HashMap<ComponentId, Vec<QueryId>>,
}

impl QueryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a query and seed it from the entities that already exist,
    /// oldest first.
    pub(crate) fn create(
        &mut self,
        required: Vec<ComponentId>,
        entities: &EntityRegistry,
    ) -> QueryId {
        let id = QueryId(self.queries.len());
        let mut query = Query::new(required);
        let mut existing: Vec<_> = entities
            .iter()
            .filter_map(|entity| Some((entities.record(entity)?.sequence(), entity)))
            .collect();
        existing.sort_unstable();
        for (_, entity) in existing {
            query.refresh(entity, entities.record(entity));
        }
        for component in query.required() {
            let routes = self.by_component.entry(*component).or_default();
            if !routes.contains(&id) {
                routes.push(id);
            }
        }
        self.queries.push(query);
        id
    }

    pub fn get(&self, id: QueryId) -> Option<&Query> {
        self.queries.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub(crate) fn handle(&mut self, event: &EngineEvent, entities: &EntityRegistry) {
        match *event {
            EngineEvent::EntityCreated(entity) => {
                let record = entities.record(entity);
                for query in &mut self.queries {
                    query.refresh(entity, record);
                }
            }
            EngineEvent::EntityReleased(entity) => {
                for query in &mut self.queries {
                    query.evict(entity);
                }
            }
            EngineEvent::ComponentAdded { entity, component }
            | EngineEvent::ComponentRemoved { entity, component } => {
                let Some(routes) = self.by_component.get(&component) else {
                    return;
                };
                let record = entities.record(entity);
                for id in routes {
                    self.queries[id.0].refresh(entity, record);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    struct Velocity;
    impl Component for Velocity {}

    fn added(entity: Entity, component: ComponentId) -> EngineEvent {
        EngineEvent::ComponentAdded { entity, component }
    }

    fn removed(entity: Entity, component: ComponentId) -> EngineEvent {
        EngineEvent::ComponentRemoved { entity, component }
    }

    #[test]
    fn test_resolve_requires_registration() {
        let mut registry = ComponentRegistry::new();
        let pos = registry.register::<Position>();

        assert_eq!(<(Position,)>::resolve(&registry).unwrap(), vec![pos]);
        assert!(<(Position, Velocity)>::resolve(&registry).is_err());
        assert!(<()>::resolve(&registry).unwrap().is_empty());
    }

    #[test]
    fn test_query_tracks_component_events() {
        let mut entities = EntityRegistry::new();
        let mut index = QueryIndex::new();
        let pos = ComponentId(0);
        let vel = ComponentId(1);
        let query = index.create(vec![pos, vel], &entities);

        let e = entities.allocate();
        index.handle(&EngineEvent::EntityCreated(e), &entities);
        assert!(!index.get(query).unwrap().contains(e));

        entities.record_mut(e).unwrap().components.insert(pos, 0);
        index.handle(&added(e, pos), &entities);
        assert!(!index.get(query).unwrap().contains(e));

        entities.record_mut(e).unwrap().components.insert(vel, 0);
        index.handle(&added(e, vel), &entities);
        assert!(index.get(query).unwrap().contains(e));

        entities.record_mut(e).unwrap().components.remove(&pos);
        index.handle(&removed(e, pos), &entities);
        assert!(index.get(query).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_matches_every_live_entity() {
        let mut entities = EntityRegistry::new();
        let mut index = QueryIndex::new();
        let existing = entities.allocate();
        let query = index.create(Vec::new(), &entities);
        assert!(index.get(query).unwrap().contains(existing));

        let e = entities.allocate();
        index.handle(&EngineEvent::EntityCreated(e), &entities);
        assert_eq!(index.get(query).unwrap().len(), 2);

        entities.deallocate(e);
        index.handle(&EngineEvent::EntityReleased(e), &entities);
        assert_eq!(
            index.get(query).unwrap().entities().collect::<Vec<_>>(),
            vec![existing]
        );
    }

    #[test]
    fn test_members_ordered_by_join() {
        let mut entities = EntityRegistry::new();
        let mut index = QueryIndex::new();
        let pos = ComponentId(0);
        let query = index.create(vec![pos], &entities);

        let a = entities.allocate();
        let b = entities.allocate();
        for e in [b, a] {
            entities.record_mut(e).unwrap().components.insert(pos, 0);
            index.handle(&added(e, pos), &entities);
        }
        assert_eq!(
            index.get(query).unwrap().entities().collect::<Vec<_>>(),
            vec![b, a]
        );

        // Leaving and rejoining moves an entity to the back
        entities.record_mut(b).unwrap().components.remove(&pos);
        index.handle(&removed(b, pos), &entities);
        entities.record_mut(b).unwrap().components.insert(pos, 1);
        index.handle(&added(b, pos), &entities);
        assert_eq!(
            index.get(query).unwrap().entities().collect::<Vec<_>>(),
            vec![a, b]
        );
    }

    #[test]
    fn test_seeding_follows_creation_order() {
        let mut entities = EntityRegistry::new();
        let a = entities.allocate();
        let b = entities.allocate();
        entities.deallocate(a);
        // Recycles a's index but is created last
        let c = entities.allocate();

        let mut index = QueryIndex::new();
        let query = index.create(Vec::new(), &entities);
        let order: Vec<_> = index.get(query).unwrap().entities().collect();
        assert_eq!(order, vec![b, c]);
        assert_eq!(c.index(), a.index());
    }

    #[test]
    fn test_next_member_walks_from_cursor() {
        let mut entities = EntityRegistry::new();
        let mut index = QueryIndex::new();
        let query = index.create(Vec::new(), &entities);
        let a = entities.allocate();
        index.handle(&EngineEvent::EntityCreated(a), &entities);

        let members = index.get(query).unwrap();
        let (stamp, first) = members.next_member(0).unwrap();
        assert_eq!(first, a);
        assert!(members.next_member(stamp + 1).is_none());

        // A member added after the cursor is still reached
        let b = entities.allocate();
        index.handle(&EngineEvent::EntityCreated(b), &entities);
        let members = index.get(query).unwrap();
        assert_eq!(members.next_member(stamp + 1).map(|(_, e)| e), Some(b));
    }

    #[test]
    fn test_wide_tuple_borrows_every_cell() {
        struct C3(u8);
        impl Component for C3 {}
        struct C4(u8);
        impl Component for C4 {}
        struct C5(u8);
        impl Component for C5 {}
        struct C6(u8);
        impl Component for C6 {}
        struct C7(u8);
        impl Component for C7 {}
        struct C8(u8);
        impl Component for C8 {}

        struct C1(u8);
        impl Component for C1 {}
        struct C2(u8);
        impl Component for C2 {}

        type Wide = (C1, C2, C3, C4, C5, C6, C7, C8);

        let mut world = World::new();
        world.register_component::<C1>();
        world.register_component::<C2>();
        world.register_component::<C3>();
        world.register_component::<C4>();
        world.register_component::<C5>();
        world.register_component::<C6>();
        world.register_component::<C7>();
        world.register_component::<C8>();
        let e = world.create_entity();
        world.add_component(e, C1(1)).unwrap();
        world.add_component(e, C2(2)).unwrap();
        world.add_component(e, C3(3)).unwrap();
        world.add_component(e, C4(4)).unwrap();
        world.add_component(e, C5(5)).unwrap();
        world.add_component(e, C6(6)).unwrap();
        world.add_component(e, C7(7)).unwrap();
        world.add_component(e, C8(8)).unwrap();

        assert_eq!(<Wide>::resolve(world.components()).unwrap().len(), 8);
        let cells = <Wide>::cells(&world, e).unwrap();
        let sum = <Wide>::with_borrowed(&cells, |(a, b, c, d, e, f, g, h)| {
            h.0 += 1;
            a.0 + b.0 + c.0 + d.0 + e.0 + f.0 + g.0 + h.0
        })
        .unwrap();
        assert_eq!(sum, 37);
        assert_eq!(world.get_component::<C8>(e).unwrap().0, 9);

        // A cell already borrowed elsewhere is reported, not panicked on
        let held = cells.0.borrow_mut();
        let err = <Wide>::with_borrowed(&cells, |_| ()).unwrap_err();
        assert!(matches!(err, EcsError::BorrowConflict { .. }));
        drop(held);
    }
}
