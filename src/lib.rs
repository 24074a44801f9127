// src/lib.rs

//! 2D ゲームフレームワークの土台になる ECS ランタイムだよ！
//!
//! エンティティの ID 管理、名前付きコンポーネントでの振る舞いの合成、
//! エンティティとシステムが共有するイベント配送、遅延生成されるシステム、
//! それからシーンの切り替えまで、ぜんぶ `World` ひとつが持ってる。
//! 描画・物理・入力みたいな外側の仕組みは、ここで決めたイベントと
//! コンポーネントの約束ごとを使う側なので、このクレートには入ってないよ。
//!
//! ```rust,ignore
//! use ecs_game_core::prelude::*;
//!
//! let world = World::new();
//! world.define_component("Health", ComponentDef::new().field("hp", 10));
//! let hero = block_on(world.create(&["Health"]))?;
//! hero.bind("Hit", Handler::for_entity(|e, _| e.set("hp", 9)));
//! hero.trigger("Hit", &Value::Null);
//! ```

// 自分で作ったモジュールたち！
pub mod config;
pub mod ecs;
pub mod error;
pub mod event;
pub mod resolver;
pub mod scene;
pub mod settings;

// よく使う型はここから直接取れるようにしておくよ。
pub use ecs::{
    AttrFlags, ComponentDef, Entity, EntityId, EntitySet, Property, Selection, Selector, System,
    SystemDef, World,
};
pub use error::{Error, Result};
pub use event::{Events, Handler, Target};
pub use resolver::{DynamicObject, DynamicRequest, DynamicResolver, ObjectKind};
pub use scene::SceneDef;

/// まとめて `use` したい時用！
pub mod prelude {
    pub use crate::config::RuntimeOptions;
    pub use crate::ecs::{
        AttrFlags, ComponentDef, Entity, EntityId, EntitySet, Property, Selection, Selector,
        System, SystemDef, World,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Events, Handler, Target};
    pub use crate::resolver::{DynamicObject, DynamicRequest, DynamicResolver, ObjectKind};
    pub use crate::scene::SceneDef;
    pub use serde_json::{json, Value};
}
