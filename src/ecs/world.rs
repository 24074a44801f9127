// src/ecs/world.rs

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use log::{debug, info};
use serde_json::{json, Map, Value};

use crate::config::{defaults, RuntimeOptions};
use crate::ecs::component::ComponentDef;
use crate::ecs::entity::{Entity, EntityId};
use crate::ecs::system::SystemSlot;
use crate::error::Result;
use crate::event::{CallbackRegistry, Dispatcher, Events, Handler, Listener, ListenerKey, Target};
use crate::resolver::DynamicResolver;
use crate::scene::SceneRegistry;

/// 生きてるエンティティの台帳と、コンポーネント名 → エンティティ ID の逆引き。
pub(crate) struct EntityStore {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    /// 逆引きには「今そのコンポーネントを持ってる」エンティティしか載せない。
    by_component: HashMap<String, BTreeSet<EntityId>>,
    next_id: EntityId,
}

impl Default for EntityStore {
    fn default() -> Self {
        EntityStore {
            entities: BTreeMap::new(),
            by_component: HashMap::new(),
            next_id: 1,
        }
    }
}

impl EntityStore {
    pub(crate) fn index(&mut self, name: &str, id: EntityId) {
        self.by_component.entry(name.to_string()).or_default().insert(id);
    }

    pub(crate) fn unindex(&mut self, name: &str, id: EntityId) {
        if let Some(ids) = self.by_component.get_mut(name) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_component.remove(name);
            }
        }
    }

    pub(crate) fn tagged(&self, name: &str) -> impl Iterator<Item = EntityId> + '_ {
        self.by_component.get(name).into_iter().flatten().copied()
    }
}

/// World の中身。ハンドル (Entity / System / EntitySet) はこれを弱参照で持つよ。
pub(crate) struct WorldInner {
    pub(crate) dispatcher: Rc<Dispatcher>,
    /// グローバルなリスナー (World 自身) のコールバック表。
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) store: RefCell<EntityStore>,
    pub(crate) components: RefCell<HashMap<String, Rc<ComponentDef>>>,
    pub(crate) systems: RefCell<HashMap<String, SystemSlot>>,
    pub(crate) scenes: RefCell<SceneRegistry>,
    pub(crate) settings: RefCell<Map<String, Value>>,
    pub(crate) functions: RefCell<HashMap<String, DynamicResolver>>,
    options: RefCell<RuntimeOptions>,
    /// init のたびに bind し直すハンドラ。
    pre_bound: RefCell<Vec<(String, Handler)>>,
    pre_bind_done: Cell<bool>,
    next_set_id: Cell<u64>,
    next_system_id: Cell<u64>,
}

impl Listener for WorldInner {
    fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn target(self: Rc<Self>) -> Target {
        Target::World(World(self))
    }
}

/// ランタイムそのもの！ エンティティの台帳、コンポーネント / システム / シーンの登録簿、
/// 設定、それからグローバルなイベント配送を全部持ってる。
///
/// 中身は `Rc` なので `clone` しても同じ World を指すよ。World を何個作っても
/// お互いに干渉しない (グローバルな状態は持たない)。
#[derive(Clone)]
pub struct World(pub(crate) Rc<WorldInner>);

impl World {
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<WorldInner>| {
            let dispatcher = Rc::new(Dispatcher::default());
            let owner: Weak<dyn Listener> = me.clone();
            let callbacks =
                CallbackRegistry::new(ListenerKey::World, Rc::downgrade(&dispatcher), owner);
            WorldInner {
                dispatcher,
                callbacks,
                store: RefCell::new(EntityStore::default()),
                components: RefCell::new(HashMap::new()),
                systems: RefCell::new(HashMap::new()),
                scenes: RefCell::new(SceneRegistry::default()),
                settings: RefCell::new(defaults::settings()),
                functions: RefCell::new(HashMap::new()),
                options: RefCell::new(RuntimeOptions::default()),
                pre_bound: RefCell::new(Vec::new()),
                pre_bind_done: Cell::new(false),
                next_set_id: Cell::new(1),
                next_system_id: Cell::new(1),
            }
        });
        let world = World(inner);
        // 全エンティティが最初にもらう土台のコンポーネント。中身は空っぽ。
        world.define_component(defaults::BASE_COMPONENT, ComponentDef::new());
        world
    }

    pub(crate) fn downgrade(&self) -> Weak<WorldInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<WorldInner>) -> Option<World> {
        weak.upgrade().map(World)
    }

    pub fn ptr_eq(&self, other: &World) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.0.dispatcher
    }

    /// World 自身 (グローバルなリスナー) のコールバック表。
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.0.callbacks
    }

    pub fn options(&self) -> RuntimeOptions {
        self.0.options.borrow().clone()
    }

    // --- ライフサイクル ---

    /// オプションを反映して、事前登録されたハンドラを bind して、`Load` を投げる。
    pub fn init(&self, options: RuntimeOptions) -> Result<&Self> {
        debug!("World::init: {:?}", options);
        for (key, value) in &options.settings {
            self.settings().set(key, value.clone())?;
        }
        *self.0.options.borrow_mut() = options;

        if !self.0.pre_bind_done.replace(true) {
            let queued = self.0.pre_bound.borrow().clone();
            for (event, handler) in queued {
                self.bind(&event, handler);
            }
        }

        self.trigger("Load", &Value::Null);
        Ok(self)
    }

    /// 次の `init` で bind されるハンドラを積んでおく。`stop(true)` のあとも再び bind されるよ。
    pub fn pre_bind(&self, event: &str, handler: Handler) -> &Self {
        self.0.pre_bound.borrow_mut().push((event.to_string(), handler));
        self
    }

    /// `Stop` を投げる。`clear_state` なら、システムを全部壊して、グローバルな
    /// コールバックを全部外して、ID カウンタを巻き戻す。
    pub fn stop(&self, clear_state: bool) -> &Self {
        self.trigger("Stop", &Value::Bool(clear_state));
        if clear_state {
            for system in self.loaded_systems() {
                system.destroy();
            }
            self.0.systems.borrow_mut().clear();
            self.0.callbacks.unbind_all();
            self.0.pre_bind_done.set(false);
            self.0.store.borrow_mut().next_id = 1;
            info!("World stopped, state cleared");
        }
        self
    }

    // --- エンティティ ---

    /// まだ使われてない次の ID。生きてるエンティティと被る番号は飛ばす。
    pub fn create_id(&self) -> EntityId {
        let mut store = self.0.store.borrow_mut();
        loop {
            let id = store.next_id;
            store.next_id += 1;
            if !store.entities.contains_key(&id) {
                return id;
            }
        }
    }

    /// ID だけ取って台帳に載せる。コンポーネントもイベントも無し。
    pub(crate) fn spawn_bare(&self) -> Entity {
        let id = self.create_id();
        self.spawn_with_id(id)
    }

    fn spawn_with_id(&self, id: EntityId) -> Entity {
        let entity = Entity::new(id, self);
        self.0.store.borrow_mut().entities.insert(id, entity.clone());
        entity
    }

    /// 新しいエンティティを作る！ 土台のコンポーネントを付けてから `names` を付けて、
    /// 名前を `"Entity #<id>"` にして、グローバルに `NewEntity {id}` を投げる。
    ///
    /// 見つからないコンポーネント名は飛ばすだけ。エラーになるのは init フックが失敗した時で、
    /// その時は作りかけのエンティティを壊してからエラーを返すよ。
    pub async fn create(&self, names: &[&str]) -> Result<Entity> {
        let entity = self.spawn_bare();
        if let Err(err) = Self::compose(&entity, names).await {
            debug!("create entity #{} failed: {}", entity.id(), err);
            entity.destroy();
            return Err(err);
        }
        entity.set_name(format!("Entity #{}", entity.id()));
        self.trigger("NewEntity", &json!({ "id": entity.id() }));
        Ok(entity)
    }

    async fn compose(entity: &Entity, names: &[&str]) -> Result<()> {
        entity.add_component(&[defaults::BASE_COMPONENT]).await?;
        if !names.is_empty() {
            entity.add_component(names).await?;
        }
        Ok(())
    }

    /// `create` の短い別名。
    pub async fn e(&self, names: &[&str]) -> Result<Entity> {
        self.create(names).await
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.0.store.borrow().entities.get(&id).cloned()
    }

    /// 生きてるエンティティの ID (昇順)。ID 0 の World エンティティも作られてれば含む。
    pub fn entities(&self) -> Vec<EntityId> {
        self.0.store.borrow().entities.keys().copied().collect()
    }

    /// ID 0 の予約エンティティ。最初に頼まれた時に作るよ。
    pub fn world_entity(&self) -> Entity {
        match self.entity(defaults::WORLD_ENTITY) {
            Some(entity) => entity,
            None => self.spawn_with_id(defaults::WORLD_ENTITY),
        }
    }

    /// `name` コンポーネントを今持ってるエンティティの ID。
    pub fn ids_with(&self, name: &str) -> Vec<EntityId> {
        self.0.store.borrow().tagged(name).collect()
    }

    pub(crate) fn index_component(&self, name: &str, id: EntityId) {
        self.0.store.borrow_mut().index(name, id);
    }

    pub(crate) fn unindex_component(&self, name: &str, id: EntityId) {
        self.0.store.borrow_mut().unindex(name, id);
    }

    /// 台帳から外す。同じ ID に別のエンティティが入ってたら触らない。
    pub(crate) fn forget_entity(&self, entity: &Entity) {
        let mut store = self.0.store.borrow_mut();
        if store.entities.get(&entity.id()).is_some_and(|e| e.ptr_eq(entity)) {
            store.entities.remove(&entity.id());
        }
    }

    pub(crate) fn next_set_id(&self) -> u64 {
        let id = self.0.next_set_id.get();
        self.0.next_set_id.set(id + 1);
        id
    }

    pub(crate) fn next_system_id(&self) -> u64 {
        let id = self.0.next_system_id.get();
        self.0.next_system_id.set(id + 1);
        id
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.0.store.borrow().entities.len())
            .field("components", &self.0.components.borrow().len())
            .field("systems", &self.0.systems.borrow().len())
            .finish()
    }
}

/// World への bind / unbind はグローバルなコールバック表に、
/// trigger はディスパッチャー経由で全リスナーに配られるよ。
impl Events for World {
    fn bind(&self, event: &str, handler: Handler) -> &Self {
        self.0.callbacks.bind(event, handler);
        self
    }

    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self {
        self.0.callbacks.unbind(event, handler);
        self
    }

    fn trigger(&self, event: &str, data: &Value) -> &Self {
        self.0.dispatcher.emit(event, data);
        self
    }
}

// テストコードは world_tests.rs に移動
#[cfg(test)]
#[path = "world_tests.rs"]
mod world_tests;
