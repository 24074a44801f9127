// src/ecs/entity.rs

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};
use itertools::Itertools;
use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::ecs::component::Property;
use crate::ecs::world::{World, WorldInner};
use crate::error::{Error, Result};
use crate::event::{CallbackRegistry, Events, Handler, Listener, ListenerKey, Target};
use crate::resolver::component_names;

/// エンティティの ID。1 から順番に振られて、ID 0 は World エンティティ用に予約されてる。
pub type EntityId = u64;

/// `attr_set_with` / `attr_extend` のオプション。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrFlags {
    /// `Change` を投げない。
    pub silent: bool,
    /// 入れ子のオブジェクトを上書きじゃなくて深くマージする。
    pub recursive: bool,
}

impl AttrFlags {
    pub fn silent() -> Self {
        AttrFlags { silent: true, recursive: false }
    }

    pub fn recursive() -> Self {
        AttrFlags { silent: false, recursive: true }
    }
}

pub(crate) struct EntityInner {
    id: EntityId,
    world: Weak<WorldInner>,
    /// 付いてるコンポーネント名 (付けた順)。
    components: RefCell<Vec<String>>,
    /// コンポーネントからコピーされたり `set` されたりした普通のプロパティ。
    props: RefCell<Map<String, Value>>,
    /// getter / setter 付きのプロパティ。同じ名前の普通のプロパティより優先。
    fields: RefCell<HashMap<String, Property<Entity>>>,
    name: RefCell<String>,
    destroyed: Cell<bool>,
    callbacks: CallbackRegistry,
}

impl Listener for EntityInner {
    fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn target(self: Rc<Self>) -> Target {
        Target::Entity(Entity(self))
    }
}

/// エンティティのハンドル！
///
/// 1つの ID に対して中身は1つだけ。`World::entity` で取っても `World::select` で取っても
/// 同じ中身を指すので、`==` はポインタの同一性で比べるよ。
#[derive(Clone)]
pub struct Entity(pub(crate) Rc<EntityInner>);

impl Entity {
    pub(crate) fn new(id: EntityId, world: &World) -> Entity {
        let dispatcher = Rc::downgrade(&world.0.dispatcher);
        Entity(Rc::new_cyclic(|me: &Weak<EntityInner>| {
            let owner: Weak<dyn Listener> = me.clone();
            EntityInner {
                id,
                world: world.downgrade(),
                components: RefCell::new(Vec::new()),
                props: RefCell::new(Map::new()),
                fields: RefCell::new(HashMap::new()),
                name: RefCell::new(String::new()),
                destroyed: Cell::new(false),
                callbacks: CallbackRegistry::new(ListenerKey::Entity(id), dispatcher, owner),
            }
        }))
    }

    pub fn id(&self) -> EntityId {
        self.0.id
    }

    pub fn world(&self) -> Option<World> {
        World::upgrade(&self.0.world)
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_alive(&self) -> bool {
        !self.0.destroyed.get()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.0.callbacks
    }

    // --- コンポーネント ---

    pub fn has(&self, name: &str) -> bool {
        self.0.components.borrow().iter().any(|c| c == name)
    }

    pub fn components(&self) -> Vec<String> {
        self.0.components.borrow().clone()
    }

    /// コンポーネントを付ける！ `&["A, B"]` みたいにカンマ区切り1つでも、`&["A", "B"]` でもOK。
    ///
    /// 見つからない名前は飛ばして残りを付ける (ベストエフォート)。
    /// 最後に `NewComponent` を頼まれた名前のリスト全部で1回だけ投げるよ。
    pub async fn add_component(&self, names: &[&str]) -> Result<&Self> {
        self.attach(component_names(names)).await?;
        Ok(self)
    }

    /// `add_component` の別名。
    pub async fn requires(&self, names: &[&str]) -> Result<&Self> {
        self.add_component(names).await
    }

    /// 付いてなければ付けて、付いてれば外す (プロパティは残す)。
    pub async fn toggle_component(&self, names: &[&str]) -> Result<&Self> {
        for name in component_names(names) {
            if self.has(&name) {
                self.remove_component(&name, true);
            } else {
                self.attach(vec![name]).await?;
            }
        }
        Ok(self)
    }

    /// 1つずつ順番に: 定義を探す → 印を付けて逆引きに載せる → フィールドをコピー →
    /// requires を先に付ける → プロパティ定義 → イベントを bind → init。
    ///
    /// requires で自分自身を呼ぶので箱に入れた Future を返してる。
    pub(crate) fn attach(&self, names: Vec<String>) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            let Some(world) = self.world() else {
                return Ok(());
            };
            for name in &names {
                if !self.is_alive() {
                    break;
                }
                if self.has(name) {
                    continue;
                }
                let def = match world.find_component(name, true).await {
                    Ok(def) => def,
                    Err(err) => {
                        debug!("entity #{}: skipping \"{}\" ({})", self.id(), name, err);
                        continue;
                    }
                };
                // 探してる間に同じ名前が付いてたら二重にはしない
                if self.has(name) || !self.is_alive() {
                    continue;
                }

                self.0.components.borrow_mut().push(name.clone());
                world.index_component(name, self.id());

                for (key, value) in &def.fields {
                    self.set(key, value.clone());
                }
                if !def.requires.is_empty() {
                    self.attach(def.requires.clone()).await?;
                }
                for (key, property) in &def.properties {
                    self.define_field(key, property.clone());
                }
                for (event, handler) in &def.events {
                    self.bind(event, handler.clone());
                }
                def.run_init(self).await?;
            }
            self.trigger("NewComponent", &json!(names));
            Ok(())
        }
        .boxed_local()
    }

    /// コンポーネントを外す。`RemoveComponent` を投げて、そのコンポーネントが bind した
    /// イベントを外して、`remove(false)` フックを呼ぶ。`soft` じゃなければ
    /// コンポーネント由来のプロパティも消すよ。付いてなければ何もしない。
    pub fn remove_component(&self, name: &str, soft: bool) -> &Self {
        if !self.has(name) {
            return self;
        }
        self.trigger("RemoveComponent", &json!(name));

        let world = self.world();
        if let Some(def) = world.as_ref().and_then(|w| w.component(name)) {
            for (event, handler) in &def.events {
                self.unbind(event, Some(handler));
            }
            if let Some(remove) = &def.remove {
                remove(self, false);
            }
            if !soft {
                let mut props = self.0.props.borrow_mut();
                for key in def.fields.keys() {
                    props.remove(key);
                }
                drop(props);
                let mut fields = self.0.fields.borrow_mut();
                for (key, _) in &def.properties {
                    fields.remove(key);
                }
            }
        }

        self.0.components.borrow_mut().retain(|c| c != name);
        if let Some(world) = &world {
            world.unindex_component(name, self.id());
        }
        self
    }

    // --- 名前 ---

    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        let name = name.into();
        *self.0.name.borrow_mut() = name.clone();
        self.trigger("NewEntityName", &Value::String(name));
        self
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    // --- プロパティ ---

    /// プロパティを読む。getter 付きのプロパティなら getter を呼ぶよ。
    pub fn get(&self, key: &str) -> Option<Value> {
        let accessor = self.0.fields.borrow().get(key).cloned();
        match accessor {
            Some(property) => property.read(self),
            None => self.0.props.borrow().get(key).cloned(),
        }
    }

    /// プロパティに書く。通知は無し。setter の無い getter だけのプロパティへの書き込みは無視。
    pub fn set(&self, key: &str, value: impl Into<Value>) -> &Self {
        let value = value.into();
        let accessor = self.0.fields.borrow().get(key).cloned();
        match accessor {
            Some(property) => {
                property.write(self, value);
            }
            None => {
                self.0.props.borrow_mut().insert(key.to_string(), value);
            }
        }
        self
    }

    /// 普通のプロパティのスナップショット (getter 付きのは入らない)。
    pub fn props(&self) -> Map<String, Value> {
        self.0.props.borrow().clone()
    }

    /// getter / setter 付きのプロパティを定義する。同じ名前の普通のプロパティは置き換わる。
    pub fn define_field(&self, key: &str, property: Property<Entity>) -> &Self {
        self.0.props.borrow_mut().remove(key);
        self.0.fields.borrow_mut().insert(key.to_string(), property);
        self
    }

    /// `"pos.x"` みたいなドット区切りで奥のほうまで読む。
    pub fn attr(&self, path: &str) -> Option<Value> {
        let mut keys = path.split('.');
        let mut current = self.get(keys.next()?)?;
        for key in keys {
            current = match &current {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?.clone(),
                other => other.get(key)?.clone(),
            };
        }
        Some(current)
    }

    /// `attr_set_with(key, value, AttrFlags::default())`
    pub fn attr_set(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.attr_set_with(key, value, AttrFlags::default())
    }

    /// ドット区切りのキーは `{a: {b: value}}` に組み立ててから深くマージする。
    pub fn attr_set_with(&self, key: &str, value: impl Into<Value>, flags: AttrFlags) -> &Self {
        let data = nest(key, value.into());
        let flags = AttrFlags {
            recursive: flags.recursive || key.contains('.'),
            ..flags
        };
        self.attr_extend(data, flags)
    }

    /// まとめて書く。`silent` じゃなければ書く前に `Change` をデータ付きで投げるよ。
    pub fn attr_extend(&self, data: Map<String, Value>, flags: AttrFlags) -> &Self {
        if !flags.silent {
            self.trigger("Change", &Value::Object(data.clone()));
        }
        for (key, value) in data {
            let value = match (flags.recursive, self.get(&key), value) {
                (true, Some(Value::Object(mut current)), Value::Object(incoming)) => {
                    deep_merge(&mut current, incoming);
                    Value::Object(current)
                }
                (_, _, value) => value,
            };
            self.set(&key, value);
        }
        self
    }

    // --- 複製・破棄 ---

    /// 同じコンポーネントを付けた新しいエンティティを作って、真偽値・数値・文字列の
    /// プロパティ (と名前) だけコピーする。配列やオブジェクトは共有も複製もしない。
    /// どれかの init が失敗したら、作りかけのコピーは壊してエラーを返す。
    pub async fn clone_entity(&self) -> Result<Entity> {
        let world = self
            .world()
            .ok_or_else(|| Error::InvalidArgument(format!("entity #{} has no world", self.id())))?;
        let clone = world.create(&[]).await?;
        for name in self.components() {
            if let Err(err) = clone.add_component(&[name.as_str()]).await {
                clone.destroy();
                return Err(err);
            }
        }
        for (key, value) in self.props() {
            if matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_)) {
                clone.set(&key, value);
            }
        }
        clone.set_name(self.name());
        Ok(clone)
    }

    /// 一回だけ効く。`Remove` を投げて、各コンポーネントの `remove(true)` を呼んで、
    /// 逆引きから消して、コールバックを全部外して、台帳から消す。
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            warn!("entity #{} is already destroyed", self.id());
            return;
        }
        self.trigger("Remove", &Value::Null);

        let world = self.world();
        let names = self.components();
        for name in &names {
            if let Some(world) = &world {
                if let Some(remove) = world.component(name).and_then(|def| def.remove.clone()) {
                    remove(self, true);
                }
                world.unindex_component(name, self.id());
            }
        }
        self.0.callbacks.unbind_all();
        if let Some(world) = &world {
            world.forget_entity(self);
        }
        self.0.components.borrow_mut().clear();
        debug!("entity #{} destroyed ({})", self.id(), names.iter().join(", "));
    }

    // --- freeze ---

    /// 凍らせる前に `Freeze` を投げる。凍ってる間は何のイベントも届かない。
    pub fn freeze(&self) -> &Self {
        if self.is_alive() && !self.is_frozen() {
            self.trigger("Freeze", &json!(self.id()));
            self.0.callbacks.freeze();
        }
        self
    }

    /// 溶かしてから `Unfreeze` を投げる。
    pub fn unfreeze(&self) -> &Self {
        if self.is_frozen() {
            self.0.callbacks.unfreeze();
            self.trigger("Unfreeze", &json!(self.id()));
        }
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.0.callbacks.is_frozen()
    }
}

/// `"a.b.c"` と値から `{a: {b: {c: value}}}` を作る。
fn nest(key: &str, value: Value) -> Map<String, Value> {
    let mut data = Map::new();
    match key.split_once('.') {
        Some((first, rest)) => {
            data.insert(first.to_string(), Value::Object(nest(rest, value)));
        }
        None => {
            data.insert(key.to_string(), value);
        }
    }
    data
}

fn deep_merge(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => deep_merge(existing, nested),
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id())
            .field("components", &*self.0.components.borrow())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Events for Entity {
    /// 壊れたエンティティへの bind は何もしない。
    fn bind(&self, event: &str, handler: Handler) -> &Self {
        if self.is_alive() {
            self.0.callbacks.bind(event, handler);
        }
        self
    }

    fn unbind(&self, event: &str, handler: Option<&Handler>) -> &Self {
        self.0.callbacks.unbind(event, handler);
        self
    }

    /// このエンティティのコールバックだけを呼ぶ (グローバルには配らない)。
    fn trigger(&self, event: &str, data: &Value) -> &Self {
        self.0.callbacks.run(&Target::Entity(self.clone()), event, data);
        self
    }
}
