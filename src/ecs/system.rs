// src/ecs/system.rs

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::ecs::component::Property;
use crate::ecs::world::{World, WorldInner};
use crate::event::{CallbackRegistry, Events, Handler, Listener, ListenerKey, Target};

/// システムのテンプレート。コンポーネントと同じ形 (フィールド・init・remove・
/// プロパティ・イベント) に、デフォルトのオプションが付いたもの。
#[derive(Clone, Default)]
pub struct SystemDef {
    pub(crate) fields: Map<String, Value>,
    pub(crate) options: Map<String, Value>,
    pub(crate) init: Option<Rc<dyn Fn(&System)>>,
    pub(crate) remove: Option<Rc<dyn Fn(&System)>>,
    pub(crate) properties: Vec<(String, Property<System>)>,
    pub(crate) events: Vec<(String, Handler)>,
}

impl SystemDef {
    pub fn new() -> Self {
        SystemDef::default()
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// デフォルトのオプション。登録時に渡したオプションの方が勝つ。
    pub fn option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn(&System) + 'static,
    {
        self.init = Some(Rc::new(f));
        self
    }

    pub fn remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&System) + 'static,
    {
        self.remove = Some(Rc::new(f));
        self
    }

    pub fn property(mut self, name: &str, property: Property<System>) -> Self {
        self.properties.push((name.to_string(), property));
        self
    }

    pub fn event(mut self, name: &str, handler: Handler) -> Self {
        self.events.push((name.to_string(), handler));
        self
    }
}

impl fmt::Debug for SystemDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDef")
            .field("fields", &self.fields)
            .field("options", &self.options)
            .field("events", &self.events.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

/// 登録簿の1枠。遅延登録なら最初に読まれるまで `Pending` のまま。
pub(crate) enum SystemSlot {
    Pending {
        def: Rc<SystemDef>,
        options: Option<Map<String, Value>>,
    },
    /// init の最中。この間に同じ名前を読んでも `None`。
    Building,
    Ready(System),
}

/// 渡されたオプションのキーは全部そのまま (null も「指定あり」)、
/// 足りないキーだけデフォルトから埋める。浅いマージ。
fn merge_options(defaults: &Map<String, Value>, specific: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut merged = specific.cloned().unwrap_or_default();
    for (key, value) in defaults {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub(crate) struct SystemInner {
    name: String,
    id: String,
    template: Rc<SystemDef>,
    world: Weak<WorldInner>,
    props: RefCell<Map<String, Value>>,
    fields: RefCell<HashMap<String, Property<System>>>,
    options: RefCell<Map<String, Value>>,
    destroyed: Cell<bool>,
    callbacks: CallbackRegistry,
}

impl Listener for SystemInner {
    fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn target(self: Rc<Self>) -> Target {
        Target::System(System(self))
    }
}

/// エンティティじゃないけどイベントには参加できる、名前付きのシングルトン。
#[derive(Clone)]
pub struct System(pub(crate) Rc<SystemInner>);

impl System {
    /// テンプレートから組み立てる: フィールドのコピー → オプションのマージ →
    /// プロパティ定義 → イベントの bind → init。
    fn build(world: &World, name: &str, template: Rc<SystemDef>, options: Option<Map<String, Value>>) -> System {
        let id = format!("system{}", world.next_system_id());
        let dispatcher = Rc::downgrade(&world.0.dispatcher);
        let options = merge_options(&template.options, options.as_ref());
        let system = System(Rc::new_cyclic(|me: &Weak<SystemInner>| {
            let owner: Weak<dyn Listener> = me.clone();
            SystemInner {
                name: name.to_string(),
                callbacks: CallbackRegistry::new(ListenerKey::System(id.clone()), dispatcher, owner),
                id,
                template: Rc::clone(&template),
                world: world.downgrade(),
                props: RefCell::new(template.fields.clone()),
                fields: RefCell::new(HashMap::new()),
                options: RefCell::new(options),
                destroyed: Cell::new(false),
            }
        }));

        for (key, property) in &template.properties {
            system.0.props.borrow_mut().remove(key);
            system.0.fields.borrow_mut().insert(key.clone(), property.clone());
        }
        for (event, handler) in &template.events {
            system.bind(event, handler.clone());
        }
        if let Some(init) = &template.init {
            init(&system);
        }
        system
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// `"system1"` みたいな ID。ディスパッチャーの表でのキーになる。
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn world(&self) -> Option<World> {
        World::upgrade(&self.0.world)
    }

    pub fn ptr_eq(&self, other: &System) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_alive(&self) -> bool {
        !self.0.destroyed.get()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.0.callbacks
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let accessor = self.0.fields.borrow().get(key).cloned();
        match accessor {
            Some(property) => property.read(self),
            None => self.0.props.borrow().get(key).cloned(),
        }
    }

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

    pub fn options(&self) -> Map<String, Value> {
        self.0.options.borrow().clone()
    }

    pub fn option(&self, key: &str) -> Option<Value> {
        self.0.options.borrow().get(key).cloned()
    }

    /// グローバルに `SystemDestroyed` を投げて、`remove` フックを呼んで、
    /// コールバックを全部外して、名前の枠を空ける。
    pub fn destroy(&self) {
        if self.0.destroyed.replace(true) {
            return;
        }
        let world = self.world();
        if let Some(world) = &world {
            world.trigger("SystemDestroyed", &json!(self.name()));
        }
        if let Some(remove) = &self.0.template.remove {
            remove(self);
        }
        self.0.callbacks.unbind_all();
        if let Some(world) = &world {
            world.release_system(self);
        }
        info!("system \"{}\" destroyed", self.name());
    }
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.0.name)
            .field("id", &self.0.id)
            .field("options", &*self.0.options.borrow())
            .finish()
    }
}

/// システムのイベントはそのシステムのコールバックだけに届く。
/// グローバルなイベントは World の trigger からディスパッチャー経由で届くよ。
impl Events for System {
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

    fn trigger(&self, event: &str, data: &Value) -> &Self {
        self.0.callbacks.run(&Target::System(self.clone()), event, data);
        self
    }
}

// --- システムの登録簿 (World に生やす) ---

impl World {
    /// システムを登録する。`lazy` なら最初に `system(name)` で読まれた時に組み立てる。
    /// そうじゃなければ今すぐ組み立てて `SystemLoaded` を投げるよ。
    pub fn register_system(
        &self,
        name: &str,
        def: SystemDef,
        options: Option<Map<String, Value>>,
        lazy: bool,
    ) -> &Self {
        let def = Rc::new(def);
        let previous = match self.0.systems.borrow().get(name) {
            Some(SystemSlot::Ready(old)) => Some(old.clone()),
            Some(_) => {
                warn!("system \"{}\" is registered again, the old slot is replaced", name);
                None
            }
            None => None,
        };
        // 組み立て済みの古いのはちゃんと壊してから差し替える
        if let Some(old) = previous {
            warn!("system \"{}\" is registered again, destroying the loaded one", name);
            old.destroy();
        }
        if lazy {
            self.0
                .systems
                .borrow_mut()
                .insert(name.to_string(), SystemSlot::Pending { def, options });
        } else {
            self.0.systems.borrow_mut().insert(name.to_string(), SystemSlot::Building);
            let system = System::build(self, name, def, options);
            self.finish_system(name, system);
        }
        self
    }

    /// 名前でシステムを取る。まだ組み立ててなければここで組み立てる (一回だけ)。
    pub fn system(&self, name: &str) -> Option<System> {
        let pending = {
            let mut systems = self.0.systems.borrow_mut();
            match systems.get(name)? {
                SystemSlot::Ready(system) => return Some(system.clone()),
                SystemSlot::Building => return None,
                SystemSlot::Pending { .. } => {}
            }
            systems.insert(name.to_string(), SystemSlot::Building)
        };
        let Some(SystemSlot::Pending { def, options }) = pending else {
            return None;
        };
        let system = System::build(self, name, def, options);
        self.finish_system(name, system.clone());
        Some(system)
    }

    /// 組み立て終わったシステムを枠に入れて `SystemLoaded` を投げる。
    /// 組み立て中に枠が空けられてたら入れない。
    fn finish_system(&self, name: &str, system: System) {
        {
            let mut systems = self.0.systems.borrow_mut();
            if !matches!(systems.get(name), Some(SystemSlot::Building)) {
                return;
            }
            systems.insert(name.to_string(), SystemSlot::Ready(system));
        }
        info!("system \"{}\" loaded", name);
        self.trigger("SystemLoaded", &json!(name));
    }

    pub(crate) fn release_system(&self, system: &System) {
        let mut systems = self.0.systems.borrow_mut();
        if let Some(SystemSlot::Ready(current)) = systems.get(system.name()) {
            if current.ptr_eq(system) {
                systems.remove(system.name());
            }
        }
    }

    /// 組み立て済みのシステム全部。
    pub(crate) fn loaded_systems(&self) -> Vec<System> {
        self.0
            .systems
            .borrow()
            .values()
            .filter_map(|slot| match slot {
                SystemSlot::Ready(system) => Some(system.clone()),
                _ => None,
            })
            .collect()
    }

    /// 登録済みの名前 (組み立て前のも含む、ソート済み)。
    pub fn system_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.systems.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_system_loaded(&self, name: &str) -> bool {
        matches!(self.0.systems.borrow().get(name), Some(SystemSlot::Ready(_)))
    }
}
