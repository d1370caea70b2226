//! # generate 子命令 CLI 定义
//!
//! 读取设置表并调用扩散生成器
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/generate.rs`

use clap::Args;
use std::path::PathBuf;

/// generate 子命令参数
#[derive(Args, Debug, Default)]
pub struct GenerateArgs {
    /// Settings table (headerless CSV)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Root directory for generated results
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Print the generator command without running it
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}
