// src/ecs/component.rs

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use log::debug;
use serde_json::{Map, Value};

use crate::config::defaults;
use crate::ecs::entity::Entity;
use crate::ecs::world::World;
use crate::error::{Error, Result};
use crate::event::Handler;
use crate::resolver::{component_names, DynamicObject, DynamicRequest};

type Getter<R> = Rc<dyn Fn(&R) -> Value>;
type Setter<R> = Rc<dyn Fn(&R, Value)>;

/// getter / setter 付きのプロパティ定義。`R` は持ち主 (エンティティかシステム)。
///
/// getter が無ければ読むと `None`、setter が無ければ書き込みは無視されるよ。
pub struct Property<R> {
    get: Option<Getter<R>>,
    set: Option<Setter<R>>,
}

impl<R> Property<R> {
    pub fn new() -> Self {
        Property { get: None, set: None }
    }

    pub fn get<F>(mut self, f: F) -> Self
    where
        F: Fn(&R) -> Value + 'static,
    {
        self.get = Some(Rc::new(f));
        self
    }

    pub fn set<F>(mut self, f: F) -> Self
    where
        F: Fn(&R, Value) + 'static,
    {
        self.set = Some(Rc::new(f));
        self
    }

    pub fn read(&self, owner: &R) -> Option<Value> {
        self.get.as_ref().map(|get| get(owner))
    }

    /// setter があれば呼んで true。
    pub fn write(&self, owner: &R, value: Value) -> bool {
        match &self.set {
            Some(set) => {
                set(owner, value);
                true
            }
            None => false,
        }
    }
}

impl<R> Default for Property<R> {
    fn default() -> Self {
        Property::new()
    }
}

// derive だと `R: Clone` を要求されちゃうので手書き
impl<R> Clone for Property<R> {
    fn clone(&self) -> Self {
        Property {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<R> fmt::Debug for Property<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

pub(crate) type InitFuture = LocalBoxFuture<'static, Result<()>>;

#[derive(Clone)]
pub(crate) enum ComponentInit {
    Sync(Rc<dyn Fn(&Entity)>),
    Async(Rc<dyn Fn(Entity) -> InitFuture>),
}

/// コンポーネントの定義！ 名前付きの振る舞いの束だよ。
///
/// ```rust,ignore
/// world.define_component(
///     "Health",
///     ComponentDef::new()
///         .field("hp", 10)
///         .requires(&["2D"])
///         .init(|e| { e.set("alive", true); })
///         .event("Hit", Handler::for_entity(|e, dmg| { /* ... */ })),
/// );
/// ```
#[derive(Clone, Default)]
pub struct ComponentDef {
    /// 付けた時にエンティティへコピーされるプロパティ。
    pub(crate) fields: Map<String, Value>,
    pub(crate) init: Option<ComponentInit>,
    /// 外される時 (`false`) と、エンティティごと壊される時 (`true`) に呼ばれる。
    pub(crate) remove: Option<Rc<dyn Fn(&Entity, bool)>>,
    pub(crate) requires: Vec<String>,
    pub(crate) properties: Vec<(String, Property<Entity>)>,
    pub(crate) events: Vec<(String, Handler)>,
    dynamic: bool,
}

impl ComponentDef {
    pub fn new() -> Self {
        ComponentDef::default()
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn(&Entity) + 'static,
    {
        self.init = Some(ComponentInit::Sync(Rc::new(f)));
        self
    }

    /// 待つ必要のある init。失敗すると、付けようとした呼び出し元にエラーが返る。
    pub fn init_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Entity) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.init = Some(ComponentInit::Async(Rc::new(move |entity| f(entity).boxed_local())));
        self
    }

    pub fn remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Entity, bool) + 'static,
    {
        self.remove = Some(Rc::new(f));
        self
    }

    /// 先に付けておくコンポーネント。
    pub fn requires(mut self, names: &[&str]) -> Self {
        self.requires.extend(component_names(names));
        self
    }

    pub fn property(mut self, name: &str, property: Property<Entity>) -> Self {
        self.properties.push((name.to_string(), property));
        self
    }

    /// 付けた時に自動で bind されて、外した時に自動で unbind されるハンドラ。
    pub fn event(mut self, name: &str, handler: Handler) -> Self {
        self.events.push((name.to_string(), handler));
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn required(&self) -> &[String] {
        &self.requires
    }

    pub fn has_init(&self) -> bool {
        self.init.is_some()
    }

    /// 動的解決で取ってきた定義か。
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub(crate) fn mark_dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub(crate) async fn run_init(&self, entity: &Entity) -> Result<()> {
        match &self.init {
            None => Ok(()),
            Some(ComponentInit::Sync(init)) => {
                init(entity);
                Ok(())
            }
            Some(ComponentInit::Async(init)) => init(entity.clone()).await,
        }
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("fields", &self.fields)
            .field("requires", &self.requires)
            .field("properties", &self.properties.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("events", &self.events.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .field("remove", &self.remove.is_some())
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

// --- コンポーネントの登録簿 (World に生やす) ---

impl World {
    /// 定義をそのまま登録する。同じ名前なら後勝ち (マージはしない)。
    pub fn define_component(&self, name: &str, def: ComponentDef) -> &Self {
        debug!("define component \"{}\": {:?}", name, def);
        self.0.components.borrow_mut().insert(name.to_string(), Rc::new(def));
        self
    }

    pub fn component(&self, name: &str) -> Option<Rc<ComponentDef>> {
        self.0.components.borrow().get(name).cloned()
    }

    pub fn is_component(&self, name: &str) -> bool {
        self.0.components.borrow().contains_key(name)
    }

    /// 登録済みの名前 (ソート済み)。
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.components.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// 名前から定義を探す。登録に無くて、`lookup` が true で、`findComponents` 設定が
    /// 有効で、リゾルバが入ってれば、リゾルバに聞きに行くよ。
    ///
    /// リゾルバが失敗したり、コンポーネント以外を返したりしたら `ComponentNotFound`。
    pub async fn find_component(&self, name: &str, lookup: bool) -> Result<Rc<ComponentDef>> {
        if let Some(def) = self.component(name) {
            return Ok(def);
        }
        if lookup && self.settings().enabled(defaults::FIND_COMPONENTS) {
            if let Some(resolver) = self.functions().find_dynamic_object() {
                match resolver(DynamicRequest::component(name)).await {
                    Ok(DynamicObject::Component(def)) => {
                        debug!("find component \"{}\" (dynamically imported)", name);
                        let def = Rc::new(def.mark_dynamic());
                        self.0
                            .components
                            .borrow_mut()
                            .insert(name.to_string(), Rc::clone(&def));
                        return Ok(def);
                    }
                    Ok(other) => {
                        debug!("find component \"{}\": resolver answered with {:?}", name, other.kind());
                    }
                    Err(err) => {
                        debug!("find component \"{}\": resolver failed: {}", name, err);
                    }
                }
            }
        }
        Err(Error::ComponentNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn last_definition_wins() {
        let world = World::new();
        world.define_component("Speed", ComponentDef::new().field("speed", 1));
        world.define_component("Speed", ComponentDef::new().field("velocity", 2));
        let def = world.component("Speed").unwrap();
        assert!(def.fields().get("speed").is_none(), "マージはしない");
        assert_eq!(def.fields().get("velocity"), Some(&json!(2)));
    }

    #[test]
    fn base_component_is_always_defined() {
        let world = World::new();
        assert!(world.is_component(defaults::BASE_COMPONENT));
        assert_eq!(world.component_names(), vec![defaults::BASE_COMPONENT.to_string()]);
    }

    #[test]
    fn find_without_resolver_reports_not_found() {
        let world = World::new();
        let err = block_on(world.find_component("Ghost", true)).unwrap_err();
        assert_eq!(err, Error::ComponentNotFound("Ghost".into()));
    }

    #[test]
    fn requires_splits_comma_lists() {
        let def = ComponentDef::new().requires(&["2D, Color ,Text"]);
        assert_eq!(def.required(), ["2D", "Color", "Text"]);
    }

    #[test]
    fn property_without_getter_reads_none() {
        let p: Property<Entity> = Property::new().set(|_, _| {});
        let world = World::new();
        let e = block_on(world.create(&[])).unwrap();
        assert_eq!(p.read(&e), None);
        assert!(p.write(&e, json!(1)));
    }
}
