// src/resolver.rs
//! 名前から定義を引っぱってくる仕組みまわり。
//!
//! 登録簿に無いコンポーネント / シーンを、外から差し込んだ非同期関数
//! (`findDynamicObject`) に聞きに行けるようにしてある。
//! あと、コンポーネント名の引数をばらす小さなヘルパーもここ。

use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::ecs::ComponentDef;
use crate::error::Result;
use crate::scene::SceneDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Component,
    Scene,
}

/// リゾルバに渡される問い合わせ。JSON にすると `{"name": ..., "type": "component"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
}

impl DynamicRequest {
    pub fn component(name: &str) -> Self {
        DynamicRequest {
            name: name.to_string(),
            kind: ObjectKind::Component,
        }
    }

    pub fn scene(name: &str) -> Self {
        DynamicRequest {
            name: name.to_string(),
            kind: ObjectKind::Scene,
        }
    }
}

/// リゾルバの答え。頼まれたのと違う種類を返したら「見つからなかった」扱い。
#[derive(Debug, Clone)]
pub enum DynamicObject {
    Component(ComponentDef),
    Scene(SceneDef),
}

impl DynamicObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            DynamicObject::Component(_) => ObjectKind::Component,
            DynamicObject::Scene(_) => ObjectKind::Scene,
        }
    }
}

pub type DynamicResolver = Rc<dyn Fn(DynamicRequest) -> LocalBoxFuture<'static, Result<DynamicObject>>>;

/// async なクロージャを `DynamicResolver` に包む。
pub fn resolver<F, Fut>(f: F) -> DynamicResolver
where
    F: Fn(DynamicRequest) -> Fut + 'static,
    Fut: Future<Output = Result<DynamicObject>> + 'static,
{
    Rc::new(move |request| f(request).boxed_local())
}

/// コンポーネント名の引数をばらす。
///
/// 引数がちょうど1つでカンマを含んでたら `"A, B ,C"` → `["A", "B", "C"]`。
/// それ以外はそのまま。
pub fn component_names(args: &[&str]) -> Vec<String> {
    match args {
        [single] if single.contains(',') => single
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        _ => args.iter().map(|name| name.to_string()).collect(),
    }
}
