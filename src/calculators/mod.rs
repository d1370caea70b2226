//! # 外部模型桥接模块
//!
//! 势函数计算器与性质预测器都是外部协作者，这里只定义调用契约
//! （trait）和基于常驻子进程的实现。
//!
//! ## 依赖关系
//! - 被 `relax/` 与 `batch/worker.rs` 使用
//! - 子模块: server, potential, predictor

pub mod potential;
pub mod predictor;
pub mod server;

pub use potential::{evaluate_with_recovery, Evaluation, PotentialEvaluator, ServerPotential};
pub use predictor::{PropertyPredictor, ServerPredictor, StructureHandle};
