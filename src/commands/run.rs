//! # run 子命令实现
//!
//! 依次执行生成（可选）、弛豫与预测；前一阶段结束后才开始下一阶段。
//!
//! ## 依赖关系
//! - 使用 `commands/generate.rs`, `commands/relax.rs`, `commands/predict.rs`

use super::{generate, predict, relax};
use crate::cli::generate::GenerateArgs;
use crate::cli::run::RunArgs;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::utils::output;

use std::ffi::OsString;

/// 执行完整流水线
pub fn execute(args: &RunArgs, config: &PipelineConfig, forwarded: Vec<OsString>) -> Result<()> {
    if args.generate {
        let generate_args = GenerateArgs {
            settings: args.settings.clone(),
            results_dir: args.results_dir.clone(),
            dry_run: false,
        };
        generate::execute(&generate_args, config)?;
        output::print_separator();
    }

    let relax_dir = config.relax_dir();
    let relaxed = relax::relax_stage(config, None, Some(&relax_dir), args.top_n)?;
    if relaxed.is_none() && !relax_dir.is_dir() {
        output::print_skip("No relaxed structures, skipping prediction");
        return Ok(());
    }

    output::print_separator();
    predict::predict_stage(config, &relax_dir, forwarded)?;
    output::print_done("Pipeline finished");
    Ok(())
}
