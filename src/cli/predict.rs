//! # predict / worker 子命令 CLI 定义
//!
//! 分块调度性质预测；worker 为单块执行入口
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/predict.rs`, `commands/worker.rs`

use clap::Args;
use std::path::PathBuf;

/// predict 子命令参数
#[derive(Args, Debug, Default)]
pub struct PredictArgs {
    /// Directory of relaxed structures (default: <results>/relax_CIF)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Structures per worker process
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Worker processes running at once (0 = auto)
    #[arg(short = 'j', long)]
    pub parallel: Option<usize>,
}

/// worker 子命令参数
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// First snapshot index (inclusive)
    pub start: usize,

    /// Last snapshot index (exclusive)
    pub end: usize,

    /// Work snapshot file, one structure path per line
    pub snapshot: PathBuf,

    /// Directory for the chunk table and side files (default: snapshot directory)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Hide the per-chunk progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}
