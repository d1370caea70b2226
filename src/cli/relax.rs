//! # relax 子命令 CLI 定义
//!
//! 批量弛豫生成的候选结构
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/relax.rs`

use clap::Args;
use std::path::PathBuf;

/// relax 子命令参数
#[derive(Args, Debug)]
pub struct RelaxArgs {
    /// Results root searched for the generated structures directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Directory containing candidate structures (overrides the search)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Directory for relaxed structures and the summary table
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum optimizer steps per structure
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Force convergence threshold (eV/Å)
    #[arg(long)]
    pub fmax: Option<f64>,

    /// Number of lowest-energy structures to list after relaxation
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,
}
