use std::collections::{HashMap, HashSet};

use orion::{Component, Engine, EcsError, Entity, QueryId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

struct Alpha(u32);
impl Component for Alpha {}

struct Beta;
impl Component for Beta {}

#[derive(Default, Clone, Copy)]
struct Expected {
    alpha: bool,
    beta: bool,
}

struct Harness {
    engine: Engine,
    model: HashMap<Entity, Expected>,
    released: Vec<Entity>,
    only_alpha: QueryId,
    both: QueryId,
    everything: QueryId,
}

impl Harness {
    fn new() -> Self {
        let mut engine = Engine::new();
        engine.register_component::<Alpha>();
        engine.register_component::<Beta>();
        let only_alpha = engine.create_query::<(Alpha,)>().unwrap();
        let both = engine.create_query::<(Beta, Alpha)>().unwrap();
        let everything = engine.create_query::<()>().unwrap();
        Self {
            engine,
            model: HashMap::new(),
            released: Vec::new(),
            only_alpha,
            both,
            everything,
        }
    }

    fn pick(&self, rng: &mut ChaCha8Rng) -> Option<Entity> {
        if self.model.is_empty() {
            return None;
        }
        let mut live: Vec<_> = self.model.keys().copied().collect();
        live.sort_by_key(|e| (e.index(), e.generation()));
        Some(live[rng.gen_range(0..live.len())])
    }

    fn apply(&mut self, rng: &mut ChaCha8Rng) {
        match rng.gen_range(0..7) {
            0 | 1 => {
                let e = self.engine.world_mut().create_entity();
                assert!(self.model.insert(e, Expected::default()).is_none());
            }
            2 => {
                let Some(e) = self.pick(rng) else { return };
                let world = self.engine.world_mut();
                let result = world.add_component(e, Alpha(e.index()));
                let expected = self.model.get_mut(&e).unwrap();
                if expected.alpha {
                    assert!(matches!(result, Err(EcsError::DuplicateComponent { .. })));
                } else {
                    result.unwrap();
                    expected.alpha = true;
                }
            }
            3 => {
                let Some(e) = self.pick(rng) else { return };
                let world = self.engine.world_mut();
                if world.add_component(e, Beta).is_ok() {
                    self.model.get_mut(&e).unwrap().beta = true;
                }
            }
            4 => {
                let Some(e) = self.pick(rng) else { return };
                let world = self.engine.world_mut();
                if rng.gen_bool(0.5) {
                    world.remove_component::<Alpha>(e).unwrap();
                    self.model.get_mut(&e).unwrap().alpha = false;
                } else {
                    world.remove_component::<Beta>(e).unwrap();
                    self.model.get_mut(&e).unwrap().beta = false;
                }
            }
            5 => {
                let Some(e) = self.pick(rng) else { return };
                self.engine.world_mut().queue_free(e).unwrap();
            }
            _ => {
                let marked: Vec<_> = self
                    .model
                    .keys()
                    .copied()
                    .filter(|e| self.engine.world().is_marked_for_deletion(*e))
                    .collect();
                self.engine.perform().unwrap();
                for e in marked {
                    self.model.remove(&e);
                    self.released.push(e);
                }
            }
        }
    }

    fn members(&self, query: QueryId) -> HashSet<Entity> {
        self.engine.world().query_members(query).into_iter().collect()
    }

    fn expected(&self, filter: impl Fn(&Expected) -> bool) -> HashSet<Entity> {
        self.model
            .iter()
            .filter(|(_, expected)| filter(expected))
            .map(|(e, _)| *e)
            .collect()
    }

    fn check(&self) {
        let world = self.engine.world();
        assert_eq!(world.entity_count(), self.model.len());
        for (e, expected) in &self.model {
            assert!(world.is_alive(*e));
            assert_eq!(world.has_component::<Alpha>(*e), expected.alpha);
            assert_eq!(world.has_component::<Beta>(*e), expected.beta);
            if expected.alpha {
                assert_eq!(world.get_component::<Alpha>(*e).unwrap().0, e.index());
            }
        }
        for e in &self.released {
            assert!(!world.is_alive(*e));
            assert!(!world.has_component::<Alpha>(*e));
        }

        assert_eq!(self.members(self.only_alpha), self.expected(|x| x.alpha));
        assert_eq!(
            self.members(self.both),
            self.expected(|x| x.alpha && x.beta)
        );
        assert_eq!(self.members(self.everything), self.expected(|_| true));

        let indices: HashSet<u32> = self.model.keys().map(|e| e.index()).collect();
        assert_eq!(
            indices.len(),
            self.model.len(),
            "live entities share an index"
        );
    }
}

#[test]
fn random_interleavings_keep_queries_consistent() {
    for seed in 0..32 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut harness = Harness::new();
        for _ in 0..250 {
            harness.apply(&mut rng);
            harness.check();
        }
    }
}

#[test]
fn query_members_follow_join_order() {
    let mut harness = Harness::new();
    let world = harness.engine.world_mut();
    let a = world.create_entity();
    let b = world.create_entity();
    let c = world.create_entity();
    for e in [c, a, b] {
        world.add_component(e, Alpha(0)).unwrap();
    }
    world.queue_free(a).unwrap();
    harness.engine.perform().unwrap();

    let world = harness.engine.world_mut();
    let d = world.create_entity();
    world.add_component(d, Alpha(0)).unwrap();
    assert_eq!(d.index(), a.index());
    assert_eq!(world.query_members(harness.only_alpha), vec![c, b, d]);
}
