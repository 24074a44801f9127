// src/config/options.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::defaults::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::error::{Error, Result};

/// `World::init` に渡すオプション。書かなかったところはデフォルト値で埋まる。
///
/// ```json
/// { "width": 800, "height": 600, "settings": { "findComponents": true } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub width: u32,
    pub height: u32,
    /// 設定ストアにそのまま流し込まれる。
    pub settings: Map<String, Value>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            settings: Map::new(),
        }
    }
}

impl RuntimeOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(format!("bad runtime options: {}", e)))
    }

    pub fn setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }
}
