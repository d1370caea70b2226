//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `generate`: 按设置表调用扩散生成器
//! - `relax`: 批量几何弛豫（可断点续跑）
//! - `predict`: 分块调度性质预测并合并结果
//! - `worker`: 单块预测（隐藏，由 `predict` 启动）
//! - `run`: 依次执行 生成 → 弛豫 → 预测
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: generate, relax, predict, run

pub mod generate;
pub mod predict;
pub mod relax;
pub mod run;

use crate::config::Device;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Matterflow - 晶体结构生成、弛豫与性质预测流水线
#[derive(Parser)]
#[command(name = "matterflow")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "A materials-discovery batch pipeline: generate, relax, predict", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "MATTERFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Compute device forwarded to the model servers
    #[arg(long, global = true, value_enum)]
    pub device: Option<Device>,

    /// Increase diagnostic verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Generate candidate structures from the settings table
    Generate(generate::GenerateArgs),

    /// Relax generated structures with the interatomic potential
    Relax(relax::RelaxArgs),

    /// Predict properties of relaxed structures in isolated chunks
    Predict(predict::PredictArgs),

    /// Process one chunk of a work snapshot (launched by `predict`)
    #[command(hide = true)]
    Worker(predict::WorkerArgs),

    /// Run relaxation and prediction in sequence (optionally generation first)
    Run(run::RunArgs),
}
