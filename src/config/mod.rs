// src/config/mod.rs
//! ランタイムの設定まわり。定数 (defaults) と、init に渡すオプション (options)。

pub mod defaults;
pub mod options;

pub use options::RuntimeOptions;
