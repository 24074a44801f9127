// src/settings.rs
//! 実行時の設定ストアと、差し込み関数のストア。
//!
//! どっちも値を書き換える「前に」`SettingsChange[<key>]` / `FunctionsChange[<key>]` を
//! グローバルに投げるよ。`register` はそのイベントに bind するだけ。

use serde_json::{Map, Value};

use crate::config::defaults;
use crate::ecs::World;
use crate::error::{Error, Result};
use crate::event::{Events, Handler};
use crate::resolver::DynamicResolver;

/// `World::settings()` で取れる設定ストアの窓口。
pub struct Settings<'w> {
    world: &'w World,
}

impl<'w> Settings<'w> {
    fn event(key: &str) -> String {
        format!("SettingsChange[{}]", key)
    }

    /// `key` が変わる時に呼ばれるハンドラ。新しい値が渡される。
    pub fn register(&self, key: &str, handler: Handler) -> &Self {
        self.world.bind(&Self::event(key), handler);
        self
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<&Self> {
        self.modify(key, value)
    }

    /// null も正当な値として入る。キーが空なら `InvalidArgument`。
    pub fn modify(&self, key: &str, value: impl Into<Value>) -> Result<&Self> {
        if key.is_empty() {
            return Err(Error::InvalidArgument(
                "setting cannot be assigned without a key".to_string(),
            ));
        }
        let value = value.into();
        self.world.trigger(&Self::event(key), &value);
        self.world.0.settings.borrow_mut().insert(key.to_string(), value);
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.world.0.settings.borrow().get(key).cloned()
    }

    /// 値が「真っぽい」時に有効。`false`・`null`・`0`・空文字・未設定は無効。
    pub fn enabled(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| truthy(&value))
    }

    /// 全部のスナップショット。
    pub fn all(&self) -> Map<String, Value> {
        self.world.0.settings.borrow().clone()
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `World::functions()` で取れる、差し込み関数のストア。
/// 今のところ入れられるのは動的リゾルバだけ。
pub struct Functions<'w> {
    world: &'w World,
}

impl<'w> Functions<'w> {
    fn event(key: &str) -> String {
        format!("FunctionsChange[{}]", key)
    }

    pub fn register(&self, key: &str, handler: Handler) -> &Self {
        self.world.bind(&Self::event(key), handler);
        self
    }

    /// 差し替える前に `FunctionsChange[<key>]` をキー名付きで投げる。
    pub fn set(&self, key: &str, function: DynamicResolver) -> Result<&Self> {
        if key.is_empty() {
            return Err(Error::InvalidArgument(
                "custom functions cannot be assigned without a key".to_string(),
            ));
        }
        self.world.trigger(&Self::event(key), &Value::String(key.to_string()));
        self.world.0.functions.borrow_mut().insert(key.to_string(), function);
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<DynamicResolver> {
        self.world.0.functions.borrow().get(key).cloned()
    }

    /// `findDynamicObject` に入ってるリゾルバ。
    pub fn find_dynamic_object(&self) -> Option<DynamicResolver> {
        self.get(defaults::FIND_DYNAMIC_OBJECT)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.world.0.functions.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl World {
    pub fn settings(&self) -> Settings<'_> {
        Settings { world: self }
    }

    pub fn functions(&self) -> Functions<'_> {
        Functions { world: self }
    }
}
