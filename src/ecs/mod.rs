// src/ecs/mod.rs
//! ECS (Entity-Component-System) のコア！
//!
//! コンポーネントは「名前付きの振る舞いの束」で、型じゃなくて名前で合成するよ。

pub mod component;
pub mod entity;
pub mod selector;
pub mod system;
pub mod world;

// `crate::ecs::X` で取れるように再エクスポート
pub use component::{ComponentDef, Property};
pub use entity::{AttrFlags, Entity, EntityId};
pub use selector::{EntitySet, Selection, Selector};
pub use system::{System, SystemDef};
pub use world::World;
