// src/ecs/selector.rs
//! 「ID かクエリでエンティティを取る」窓口！
//!
//! 結果がちょうど1体なら `Selection::One` でそのエンティティそのものが返る。
//! 0体か2体以上なら `Selection::Many` で、ID のリストを抱えた `EntitySet` になるよ。

use std::fmt;
use std::rc::{Rc, Weak};

use itertools::Itertools;
use serde_json::Value;

use crate::config::defaults;
use crate::ecs::entity::{Entity, EntityId};
use crate::ecs::world::{World, WorldInner};
use crate::error::Result;
use crate::event::{once_wrapper, CallbackRegistry, Events, Handler, Listener, ListenerKey, Target};
use crate::resolver::component_names;

/// 何を選ぶか。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// ID 0 の World エンティティ (無ければ作る)。
    World,
    Id(EntityId),
    /// 生きてる全エンティティ (`"*"`)。
    All,
    /// どれか1つでも持ってるエンティティの和集合。
    Components(Vec<String>),
}

impl From<&str> for Selector {
    fn from(query: &str) -> Self {
        match query.trim() {
            "" => Selector::World,
            "*" => Selector::All,
            _ => Selector::Components(component_names(&[query])),
        }
    }
}

impl From<&[&str]> for Selector {
    fn from(names: &[&str]) -> Self {
        Selector::Components(component_names(names))
    }
}

impl<const N: usize> From<[&str; N]> for Selector {
    fn from(names: [&str; N]) -> Self {
        Selector::Components(component_names(&names))
    }
}

impl From<EntityId> for Selector {
    fn from(id: EntityId) -> Self {
        if id == defaults::WORLD_ENTITY {
            Selector::World
        } else {
            Selector::Id(id)
        }
    }
}

pub(crate) struct SetInner {
    ids: Vec<EntityId>,
    world: Weak<WorldInner>,
    /// セット自身のコールバック表。`*_local` からしか触らない。
    callbacks: CallbackRegistry,
}

impl Listener for SetInner {
    fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn target(self: Rc<Self>) -> Target {
        Target::Set(EntitySet(self))
    }
}

/// 0体か2体以上のエンティティ ID を、作った時点でコピーして抱えてるセット。
///
/// イベント操作は中の生きてるエンティティ全員に配られる。途中で壊されたエンティティは
/// 黙って飛ばすよ。
#[derive(Clone)]
pub struct EntitySet(Rc<SetInner>);

impl EntitySet {
    pub(crate) fn new(world: &World, ids: Vec<EntityId>) -> EntitySet {
        let key = ListenerKey::Set(world.next_set_id());
        EntitySet(Rc::new_cyclic(|me: &Weak<SetInner>| {
            let owner: Weak<dyn Listener> = me.clone();
            SetInner {
                ids,
                world: world.downgrade(),
                // ディスパッチャーには載せない。`trigger_local` からしか呼ばれない
                callbacks: CallbackRegistry::new(key, Weak::new(), owner),
            }
        }))
    }

    pub fn world(&self) -> Option<World> {
        World::upgrade(&self.0.world)
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.0.ids
    }

    pub fn len(&self) -> usize {
        self.0.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.ids.is_empty()
    }

    fn live(&self, id: EntityId) -> Option<Entity> {
        self.world()?.entity(id)
    }

    /// 生きてるエンティティごとに `f(entity, index)`。index はセットの中での位置。
    pub fn each<F>(&self, mut f: F) -> &Self
    where
        F: FnMut(&Entity, usize),
    {
        for (index, id) in self.0.ids.iter().enumerate() {
            if let Some(entity) = self.live(*id) {
                f(&entity, index);
            }
        }
        self
    }

    /// 生きてるエンティティ全部。
    pub fn get(&self) -> Vec<Entity> {
        self.0.ids.iter().filter_map(|id| self.live(*id)).collect()
    }

    /// 位置で1体取る。負の数は後ろから (`-1` が最後)。範囲外なら `None`。
    pub fn get_index(&self, index: isize) -> Option<Entity> {
        let len = self.0.ids.len() as isize;
        if index >= len || index + len < 0 {
            return None;
        }
        let at = if index >= 0 { index } else { index + len };
        self.live(self.0.ids[at as usize])
    }

    pub fn freeze(&self) -> &Self {
        self.each(|e, _| {
            e.freeze();
        })
    }

    pub fn unfreeze(&self) -> &Self {
        self.each(|e, _| {
            e.unfreeze();
        })
    }

    pub fn destroy(&self) {
        self.each(|e, _| e.destroy());
    }

    pub async fn add_component(&self, names: &[&str]) -> Result<&Self> {
        for entity in self.get() {
            entity.add_component(names).await?;
        }
        Ok(self)
    }

    pub fn remove_component(&self, name: &str, soft: bool) -> &Self {
        self.each(|e, _| {
            e.remove_component(name, soft);
        })
    }

    // --- セット自身のコールバック表 ---

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.0.callbacks
    }

    pub fn bind_local(&self, event: &str, handler: Handler) -> &Self {
        self.0.callbacks.bind(event, handler);
        self
    }

    pub fn unbind_local(&self, event: &str, handler: Option<&Handler>) -> &Self {
        self.0.callbacks.unbind(event, handler);
        self
    }

    pub fn trigger_local(&self, event: &str, data: &Value) -> &Self {
        self.0.callbacks.run(&Target::Set(self.clone()), event, data);
        self
    }
}

impl fmt::Debug for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySet").field("ids", &self.0.ids).finish()
    }
}

impl Events for EntitySet {
    fn bind(&self, event: &str, handler: Handler) -> &Self {
        self.each(|e, _| {
            e.bind(event, handler.clone());
        })
    }

    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self {
        self.each(|e, _| {
            e.unbind(event, handler);
        })
    }

    fn trigger(&self, event: &str, data: &Value) -> &Self {
        self.each(|e, _| {
            e.trigger(event, data);
        })
    }

    /// どれか1体で発火したら、セットの全員から外す。
    fn one(&self, event: &str, handler: Handler) -> Handler {
        let set = self.clone();
        let wrapper = once_wrapper(event, handler, move |_, event, me| {
            set.unbind(event, Some(me));
        });
        self.bind(event, wrapper.clone());
        wrapper
    }
}

/// `World::select` の結果。
#[derive(Clone, Debug)]
pub enum Selection {
    One(Entity),
    Many(EntitySet),
}

impl Selection {
    /// ちょうど1体だった時だけ、そのエンティティ。
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Selection::One(entity) => Some(entity),
            Selection::Many(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Selection::One(_) => 1,
            Selection::Many(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<EntityId> {
        match self {
            Selection::One(entity) => vec![entity.id()],
            Selection::Many(set) => set.ids().to_vec(),
        }
    }

    pub fn each<F>(&self, mut f: F) -> &Self
    where
        F: FnMut(&Entity, usize),
    {
        match self {
            Selection::One(entity) => {
                if entity.is_alive() {
                    f(entity, 0);
                }
            }
            Selection::Many(set) => {
                set.each(f);
            }
        }
        self
    }

    pub fn get(&self) -> Vec<Entity> {
        match self {
            Selection::One(entity) if entity.is_alive() => vec![entity.clone()],
            Selection::One(_) => Vec::new(),
            Selection::Many(set) => set.get(),
        }
    }

    pub fn get_index(&self, index: isize) -> Option<Entity> {
        match self {
            Selection::One(entity) if (index == 0 || index == -1) && entity.is_alive() => {
                Some(entity.clone())
            }
            Selection::One(_) => None,
            Selection::Many(set) => set.get_index(index),
        }
    }

    pub fn freeze(&self) -> &Self {
        self.each(|e, _| {
            e.freeze();
        })
    }

    pub fn unfreeze(&self) -> &Self {
        self.each(|e, _| {
            e.unfreeze();
        })
    }

    pub fn destroy(&self) {
        self.each(|e, _| e.destroy());
    }

    pub async fn add_component(&self, names: &[&str]) -> Result<&Self> {
        match self {
            Selection::One(entity) => {
                entity.add_component(names).await?;
            }
            Selection::Many(set) => {
                set.add_component(names).await?;
            }
        }
        Ok(self)
    }
}

impl Events for Selection {
    fn bind(&self, event: &str, handler: Handler) -> &Self {
        match self {
            Selection::One(entity) => {
                entity.bind(event, handler);
            }
            Selection::Many(set) => {
                set.bind(event, handler);
            }
        }
        self
    }

    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self {
        match self {
            Selection::One(entity) => {
                entity.unbind(event, handler);
            }
            Selection::Many(set) => {
                set.unbind(event, handler);
            }
        }
        self
    }

    fn trigger(&self, event: &str, data: &Value) -> &Self {
        match self {
            Selection::One(entity) => {
                entity.trigger(event, data);
            }
            Selection::Many(set) => {
                set.trigger(event, data);
            }
        }
        self
    }

    fn one(&self, event: &str, handler: Handler) -> Handler {
        match self {
            Selection::One(entity) => entity.one(event, handler),
            Selection::Many(set) => set.one(event, handler),
        }
    }
}

impl World {
    /// ID・`"*"`・コンポーネント名でエンティティを選ぶ。
    ///
    /// - `Selector::World` (空文字、ID 0) → World エンティティ (最初の一回で作る)
    /// - 無効な ID → 空のセット
    /// - コンポーネント名 → 和集合 (重複なし、ID の昇順)
    pub fn select(&self, selector: impl Into<Selector>) -> Selection {
        match selector.into() {
            Selector::World | Selector::Id(defaults::WORLD_ENTITY) => {
                Selection::One(self.world_entity())
            }
            Selector::Id(id) => match self.entity(id) {
                Some(entity) => Selection::One(entity),
                None => Selection::Many(EntitySet::new(self, Vec::new())),
            },
            Selector::All => self.collapse(self.entities()),
            Selector::Components(names) => {
                let ids = names
                    .iter()
                    .flat_map(|name| self.ids_with(name))
                    .sorted()
                    .dedup()
                    .collect();
                self.collapse(ids)
            }
        }
    }

    fn collapse(&self, ids: Vec<EntityId>) -> Selection {
        if let [only] = ids.as_slice() {
            if let Some(entity) = self.entity(*only) {
                return Selection::One(entity);
            }
        }
        Selection::Many(EntitySet::new(self, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentDef;
    use futures::executor::block_on;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn world_with_tags() -> World {
        let world = World::new();
        world.define_component("Red", ComponentDef::new());
        world.define_component("Blue", ComponentDef::new());
        world
    }

    #[test]
    fn single_match_is_the_canonical_entity() {
        let world = world_with_tags();
        let e = block_on(world.create(&["Red"])).unwrap();

        let by_id = world.select(e.id());
        let by_query = world.select("Red");
        assert!(by_id.entity().unwrap().ptr_eq(&e));
        assert!(by_query.entity().unwrap().ptr_eq(&e));
        assert!(world.entity(e.id()).unwrap().ptr_eq(&e));
    }

    #[test]
    fn union_query_deduplicates_and_sorts() {
        let world = world_with_tags();
        let a = block_on(world.create(&["Red", "Blue"])).unwrap();
        let b = block_on(world.create(&["Blue"])).unwrap();
        let _c = block_on(world.create(&[])).unwrap();

        let selection = world.select("Red, Blue");
        assert_eq!(selection.ids(), vec![a.id(), b.id()]);
        assert_eq!(world.select(["Blue"]).len(), 2);
    }

    #[test]
    fn wildcard_covers_every_live_entity() {
        let world = World::new();
        let ids: Vec<_> = (0..3).map(|_| block_on(world.create(&[])).unwrap().id()).collect();
        assert_eq!(world.select("*").ids(), ids);
    }

    #[test]
    fn empty_selector_gives_the_world_entity() {
        let world = World::new();
        let first = world.select("");
        let second = world.select(Selector::World);
        let third = world.select(0u64);
        let god = first.entity().unwrap();
        assert_eq!(god.id(), 0);
        assert!(second.entity().unwrap().ptr_eq(god));
        assert!(third.entity().unwrap().ptr_eq(god));
        assert!(god.components().is_empty());
    }

    #[test]
    fn unknown_id_is_an_empty_set() {
        let world = World::new();
        let selection = world.select(99u64);
        assert!(selection.is_empty());
        assert!(selection.get().is_empty());
        assert!(selection.get_index(0).is_none());
        selection.trigger("Anything", &Value::Null); // 何も起きない
    }

    #[test]
    fn get_index_counts_back_from_the_end() {
        let world = world_with_tags();
        let es: Vec<_> = (0..3).map(|_| block_on(world.create(&["Red"])).unwrap()).collect();
        let reds = world.select("Red");
        assert!(reds.get_index(0).unwrap().ptr_eq(&es[0]));
        assert!(reds.get_index(-1).unwrap().ptr_eq(&es[2]));
        assert!(reds.get_index(-3).unwrap().ptr_eq(&es[0]));
        assert!(reds.get_index(3).is_none());
        assert!(reds.get_index(-4).is_none());
    }

    #[test]
    fn each_skips_entities_destroyed_mid_iteration() {
        let world = world_with_tags();
        let es: Vec<_> = (0..3).map(|_| block_on(world.create(&["Red"])).unwrap()).collect();
        let reds = world.select("Red");
        let visited = RefCell::new(Vec::new());
        let last = es[2].clone();
        reds.each(|e, i| {
            visited.borrow_mut().push(i);
            if i == 0 {
                last.destroy();
            }
            assert!(e.is_alive());
        });
        assert_eq!(*visited.borrow(), vec![0, 1]);
    }

    #[test]
    fn events_fan_out_to_members() {
        let world = world_with_tags();
        let a = block_on(world.create(&["Red"])).unwrap();
        let b = block_on(world.create(&["Red"])).unwrap();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        world
            .select("Red")
            .bind("Poke", Handler::for_entity(move |e, _| sink.borrow_mut().push(e.id())));

        a.trigger("Poke", &Value::Null);
        world.select("Red").trigger("Poke", &Value::Null);
        assert_eq!(*hits.borrow(), vec![a.id(), a.id(), b.id()]);

        world.select("Red").unbind("Poke", None);
        b.trigger("Poke", &Value::Null);
        assert_eq!(hits.borrow().len(), 3);
    }

    #[test]
    fn one_on_a_set_fires_once_in_total() {
        let world = world_with_tags();
        let a = block_on(world.create(&["Red"])).unwrap();
        let b = block_on(world.create(&["Red"])).unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        world.select("Red").one("Ping", Handler::new(move |_, _| c.set(c.get() + 1)));

        world.trigger("Ping", &Value::Null);
        a.trigger("Ping", &Value::Null);
        b.trigger("Ping", &Value::Null);
        assert_eq!(count.get(), 1);
        assert!(!a.callbacks().has_event("Ping"));
        assert!(!b.callbacks().has_event("Ping"));
    }

    #[test]
    fn local_registry_is_separate_from_members() {
        let world = world_with_tags();
        block_on(world.create(&["Red"])).unwrap();
        block_on(world.create(&["Red"])).unwrap();
        let Selection::Many(set) = world.select("Red") else {
            panic!("2体なのでセットのはず");
        };
        let got = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&got);
        set.bind_local("Group", Handler::new(move |target, data| {
            assert!(matches!(target, Target::Set(_)));
            *sink.borrow_mut() = Some(data.clone());
        }));
        set.trigger_local("Group", &json!("hi"));
        assert_eq!(*got.borrow(), Some(json!("hi")));
        assert!(set.get().iter().all(|e| !e.callbacks().has_event("Group")));

        set.unbind_local("Group", None);
        assert!(!set.callbacks().has_event("Group"));
    }

    #[test]
    fn global_trigger_never_reaches_a_set_registry() {
        let world = world_with_tags();
        block_on(world.create(&["Red"])).unwrap();
        block_on(world.create(&["Red"])).unwrap();
        let Selection::Many(set) = world.select("Red") else {
            panic!("2体なのでセットのはず");
        };
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        set.bind_local("Group", Handler::new(move |_, _| h.set(h.get() + 1)));

        world.trigger("Group", &Value::Null);
        assert_eq!(hits.get(), 0, "セット自身の表は trigger_local 専用");
        assert!(world.dispatcher().listeners("Group").is_empty());

        drop(set);
        assert!(world.dispatcher().listeners("Group").is_empty(), "捨てたセットの残骸も残らない");
    }

    #[test]
    fn freezing_a_set_freezes_each_member() {
        let world = world_with_tags();
        let a = block_on(world.create(&["Red"])).unwrap();
        let b = block_on(world.create(&["Red"])).unwrap();
        let reds = world.select("Red");
        reds.freeze();
        assert!(a.is_frozen() && b.is_frozen());
        reds.unfreeze();
        assert!(!a.is_frozen() && !b.is_frozen());
    }
}
