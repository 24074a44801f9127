// src/scene.rs
//! シーン！ 名前付きの「initialize / uninitialize」の組で、
//! 入るたびに前のシーンの 2D エンティティを片付けるよ。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use log::debug;
use serde_json::{json, Value};

use crate::config::defaults;
use crate::ecs::World;
use crate::error::{Error, Result};
use crate::event::Events;
use crate::resolver::{DynamicObject, DynamicRequest};

type Initialize = Rc<dyn Fn(World, Value) -> LocalBoxFuture<'static, Result<()>>>;
type Uninitialize = Rc<dyn Fn(&World)>;

/// シーンの定義。`initialize` は必須。
#[derive(Clone, Default)]
pub struct SceneDef {
    initialize: Option<Initialize>,
    uninitialize: Option<Uninitialize>,
    dynamic: bool,
}

impl SceneDef {
    pub fn new() -> Self {
        SceneDef::default()
    }

    /// シーンに入る時に、`enter_scene` に渡したデータ付きで呼ばれる。
    pub fn initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(World, Value) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.initialize = Some(Rc::new(move |world, data| f(world, data).boxed_local()));
        self
    }

    /// 待つ必要のない initialize 用。
    pub fn initialize_with<F>(self, f: F) -> Self
    where
        F: Fn(&World, &Value) + 'static,
    {
        self.initialize(move |world, data| {
            f(&world, &data);
            futures::future::ready(Ok(()))
        })
    }

    /// 次のシーンに移る時の後片付け。
    pub fn uninitialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&World) + 'static,
    {
        self.uninitialize = Some(Rc::new(f));
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    fn mark_dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}

impl fmt::Debug for SceneDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneDef")
            .field("initialize", &self.initialize.is_some())
            .field("uninitialize", &self.uninitialize.is_some())
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct SceneRegistry {
    scenes: HashMap<String, Rc<SceneDef>>,
    current: Option<String>,
}

impl World {
    /// シーンを登録する (後勝ち)。名前が空か、initialize が無ければ `InvalidArgument`。
    pub fn define_scene(&self, name: &str, scene: SceneDef) -> Result<&Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("scene name cannot be empty".to_string()));
        }
        if scene.initialize.is_none() {
            return Err(Error::InvalidArgument(format!(
                "scene \"{}\" has no initialize function",
                name
            )));
        }
        debug!("define scene \"{}\": {:?}", name, scene);
        self.0
            .scenes
            .borrow_mut()
            .scenes
            .insert(name.to_string(), Rc::new(scene));
        Ok(self)
    }

    pub fn scene(&self, name: &str) -> Option<Rc<SceneDef>> {
        self.0.scenes.borrow().scenes.get(name).cloned()
    }

    pub fn current_scene(&self) -> Option<String> {
        self.0.scenes.borrow().current.clone()
    }

    /// 今のシーンを片付ける。シーンに入ってなければ何もしない。
    pub async fn cleanup_scene(&self) {
        self.cleanup_for(None).await;
    }

    /// `SceneDestroy {newScene}` を投げて、`Persist` の付いてない 2D エンティティを全部壊して、
    /// 今のシーンの uninitialize を呼ぶ。
    async fn cleanup_for(&self, next: Option<&str>) {
        let Some(current) = self.current_scene() else {
            return;
        };
        self.trigger("SceneDestroy", &json!({ "newScene": next }));

        for entity in self.select(defaults::SCENE_TAG).get() {
            if !entity.has(defaults::PERSIST_TAG) {
                entity.destroy();
            }
        }

        if let Ok(scene) = self.find_scene(&current, false).await {
            if let Some(uninitialize) = &scene.uninitialize {
                uninitialize(self);
            }
        }
    }

    /// シーンに入る！ 前のシーンを片付けてから `SceneChange {oldScene, newScene}` を投げて、
    /// シーンを探して initialize を呼ぶ。
    ///
    /// 見つからない・initialize が失敗した、はそのまま呼び出し元に返すよ。
    pub async fn enter_scene(&self, name: &str, data: Value) -> Result<()> {
        self.cleanup_for(Some(name)).await;
        let old = self.0.scenes.borrow_mut().current.replace(name.to_string());
        self.trigger("SceneChange", &json!({ "oldScene": old, "newScene": name }));
        debug!("enter scene \"{}\": {}", name, data);

        let scene = self.find_scene(name, true).await?;
        match &scene.initialize {
            Some(initialize) => initialize(self.clone(), data).await,
            None => Err(Error::InvalidArgument(format!(
                "scene \"{}\" has no initialize function",
                name
            ))),
        }
    }

    /// 名前からシーンを探す。動的解決は `findScenes` 設定で有効にした時だけ。
    pub async fn find_scene(&self, name: &str, lookup: bool) -> Result<Rc<SceneDef>> {
        if let Some(scene) = self.scene(name) {
            return Ok(scene);
        }
        if lookup && self.settings().enabled(defaults::FIND_SCENES) {
            if let Some(resolver) = self.functions().find_dynamic_object() {
                match resolver(DynamicRequest::scene(name)).await {
                    Ok(DynamicObject::Scene(scene)) => {
                        debug!("find scene \"{}\" (dynamically imported)", name);
                        if self.define_scene(name, scene.mark_dynamic()).is_ok() {
                            if let Some(scene) = self.scene(name) {
                                return Ok(scene);
                            }
                        }
                    }
                    Ok(other) => {
                        debug!("find scene \"{}\": resolver answered with {:?}", name, other.kind());
                    }
                    Err(err) => {
                        debug!("find scene \"{}\": resolver failed: {}", name, err);
                    }
                }
            }
        }
        Err(Error::SceneNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentDef;
    use crate::event::Handler;
    use crate::resolver::resolver;
    use futures::executor::block_on;
    use std::cell::RefCell;

    fn with_tags() -> World {
        let world = World::new();
        world.define_component(defaults::SCENE_TAG, ComponentDef::new());
        world.define_component(defaults::PERSIST_TAG, ComponentDef::new());
        world
    }

    #[test]
    fn define_rejects_bad_shapes() {
        let world = World::new();
        let ok = SceneDef::new().initialize_with(|_, _| {});
        assert!(matches!(world.define_scene("", ok), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            world.define_scene("Empty", SceneDef::new()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(world.scene("Empty").is_none());
    }

    #[test]
    fn entering_passes_data_to_initialize() {
        let world = World::new();
        let got = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&got);
        world
            .define_scene(
                "Title",
                SceneDef::new().initialize_with(move |_, data| *sink.borrow_mut() = Some(data.clone())),
            )
            .unwrap();

        block_on(world.enter_scene("Title", json!({"level": 1}))).unwrap();
        assert_eq!(*got.borrow(), Some(json!({"level": 1})));
        assert_eq!(world.current_scene().as_deref(), Some("Title"));
    }

    #[test]
    fn switching_scenes_cleans_up_the_previous_one() {
        let world = with_tags();
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&log);
        let first = SceneDef::new()
            .initialize(|world: World, _| async move {
                world.create(&["2D"]).await?;
                world.create(&["2D", "Persist"]).await?;
                world.create(&[]).await?;
                Ok(())
            })
            .uninitialize(move |_| sink.borrow_mut().push("uninit first".to_string()));
        world.define_scene("First", first).unwrap();
        world
            .define_scene("Second", SceneDef::new().initialize_with(|_, _| {}))
            .unwrap();

        let sink = Rc::clone(&log);
        world.bind(
            "SceneDestroy",
            Handler::new(move |_, data| sink.borrow_mut().push(format!("destroy {}", data))),
        );
        let sink = Rc::clone(&log);
        world.bind(
            "SceneChange",
            Handler::new(move |_, data| sink.borrow_mut().push(format!("change {}", data))),
        );

        block_on(world.enter_scene("First", Value::Null)).unwrap();
        assert_eq!(world.select("2D").len(), 2);

        block_on(world.enter_scene("Second", Value::Null)).unwrap();
        let survivors = world.select("2D");
        assert_eq!(survivors.len(), 1, "Persist 付きだけ残る");
        assert!(survivors.get()[0].has("Persist"));
        assert_eq!(world.entities().len(), 2, "2D じゃないエンティティは残る");

        assert_eq!(
            *log.borrow(),
            vec![
                format!("change {}", json!({"oldScene": null, "newScene": "First"})),
                format!("destroy {}", json!({"newScene": "Second"})),
                "uninit first".to_string(),
                format!("change {}", json!({"oldScene": "First", "newScene": "Second"})),
            ]
        );
    }

    #[test]
    fn unknown_scene_is_not_found() {
        let world = World::new();
        let err = block_on(world.enter_scene("Nowhere", Value::Null)).unwrap_err();
        assert_eq!(err, Error::SceneNotFound("Nowhere".into()));
    }

    #[test]
    fn initialize_failure_propagates() {
        let world = World::new();
        world
            .define_scene(
                "Broken",
                SceneDef::new().initialize(|_, _| async { Err(Error::Hook("no assets".into())) }),
            )
            .unwrap();
        let err = block_on(world.enter_scene("Broken", Value::Null)).unwrap_err();
        assert_eq!(err, Error::Hook("no assets".into()));
    }

    #[test]
    fn dynamic_scenes_need_the_setting() {
        let world = World::new();
        world
            .functions()
            .set(
                defaults::FIND_DYNAMIC_OBJECT,
                resolver(|request: DynamicRequest| async move {
                    assert_eq!(request.kind, crate::resolver::ObjectKind::Scene);
                    Ok(DynamicObject::Scene(SceneDef::new().initialize_with(|_, _| {})))
                }),
            )
            .unwrap();

        assert!(block_on(world.find_scene("Lazy", true)).is_err(), "findScenes が false の間は探さない");

        world.settings().set(defaults::FIND_SCENES, true).unwrap();
        let scene = block_on(world.find_scene("Lazy", true)).unwrap();
        assert!(scene.is_dynamic());
        assert!(world.scene("Lazy").is_some(), "一度見つけたら登録される");
    }
}
