//! # run 子命令 CLI 定义
//!
//! 顺序执行完整流水线
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/run.rs`

use clap::Args;
use std::path::PathBuf;

/// run 子命令参数
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run the generator before relaxation
    #[arg(long, default_value_t = false)]
    pub generate: bool,

    /// Settings table used when --generate is given
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Root directory for all pipeline outputs
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Number of lowest-energy structures to list after relaxation
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Structures per worker process
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Worker processes running at once (0 = auto)
    #[arg(short = 'j', long)]
    pub parallel: Option<usize>,
}
