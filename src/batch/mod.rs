//! # 批量处理模块
//!
//! 提供文件收集、分块调度与单块预测能力。
//!
//! ## 功能
//! - 自然顺序收集结构文件并写出工作快照
//! - 按块启动独立 worker 进程，合并分块结果表
//! - 并行执行与进度反馈
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod dispatcher;
pub mod runner;
pub mod worker;

pub use collector::{find_dir_named, FileCollector};
pub use dispatcher::{ChunkLauncher, Dispatcher, ProcessLauncher};
pub use runner::{BatchResult, BatchRunner, ProcessResult};
pub use worker::PredictionWorker;
