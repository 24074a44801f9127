// src/config/defaults.rs
//! ランタイムが前提にしてる名前と初期値を定義するよ！

use serde_json::{Map, Value};

use crate::ecs::EntityId;

pub const DEFAULT_WIDTH: u32 = 500; // ステージの幅
pub const DEFAULT_HEIGHT: u32 = 500; // ステージの高さ

/// 全エンティティが最初に付けられる、中身が空の土台コンポーネント。
pub const BASE_COMPONENT: &str = "obj";
/// グローバルなイベント用に予約された World エンティティの ID。
pub const WORLD_ENTITY: EntityId = 0;

// --- シーンの後片付けで見る目印 ---
pub const SCENE_TAG: &str = "2D"; // シーンが変わると壊される
pub const PERSIST_TAG: &str = "Persist"; // 2D でもこれが付いてれば残る

// --- 動的解決 ---
pub const FIND_COMPONENTS: &str = "findComponents";
pub const FIND_SCENES: &str = "findScenes";
/// リゾルバを入れておく関数ストアのキー。
pub const FIND_DYNAMIC_OBJECT: &str = "findDynamicObject";

/// 設定ストアの初期値。動的解決はどっちも最初は切ってある。
pub fn settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert(FIND_COMPONENTS.to_string(), Value::Bool(false));
    settings.insert(FIND_SCENES.to_string(), Value::Bool(false));
    settings
}
