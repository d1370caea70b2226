//! # 数据模型模块
//!
//! 定义晶体结构、能量记录与性质预测结果的数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`relax/`、`batch/` 和 `commands/` 使用
//! - 子模块: structure, energy, prediction

pub mod energy;
pub mod prediction;
pub mod structure;

pub use energy::{EnergyRecord, RelaxOutcome, SummaryRow};
pub use prediction::{ChunkRow, PropertyValue, PARSE_ERROR, PREDICTION_ERROR};
pub use structure::{Atom, Crystal, Lattice};
