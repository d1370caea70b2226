//! # 几何弛豫模块
//!
//! 把生成的候选结构弛豫到势能面局部极小，记录能量并支持断点续跑。
//!
//! ## 依赖关系
//! - 被 `commands/relax.rs` 使用
//! - 使用 `calculators/` 与 `parsers/`
//! - 子模块: optimizer, ledger, engine, summary

pub mod engine;
pub mod ledger;
pub mod optimizer;
pub mod summary;

pub use engine::{RelaxReport, RelaxationEngine};
pub use ledger::{is_relaxed_file, CheckpointLedger};
pub use optimizer::RelaxPolicy;
