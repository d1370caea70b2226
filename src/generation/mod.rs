//! # 结构生成模块
//!
//! 读取设置表，解析出生成模型与条件性质，调用外部扩散生成器。
//!
//! ## 依赖关系
//! - 被 `commands/generate.rs` 使用
//! - 子模块: settings, invoker

pub mod invoker;
pub mod settings;

pub use settings::{resolve, ConditionValue, GenerationRequest, SettingsTable};
