//! # predict 子命令实现
//!
//! 把弛豫结构分块交给独立 worker 进程预测，最后合并成一张结果表。
//!
//! ## 依赖关系
//! - 使用 `cli/predict.rs` 定义的参数
//! - 使用 `batch/dispatcher.rs`
//! - 使用 `utils/output.rs`

use crate::batch::dispatcher::DispatchReport;
use crate::batch::{Dispatcher, ProcessLauncher};
use crate::cli::predict::PredictArgs;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::utils::output;

use std::ffi::OsString;
use std::path::Path;

/// 执行批量预测
pub fn execute(args: &PredictArgs, config: &PipelineConfig, forwarded: Vec<OsString>) -> Result<()> {
    let input_dir = args.input.clone().unwrap_or_else(|| config.relax_dir());
    predict_stage(config, &input_dir, forwarded).map(|_| ())
}

/// 预测阶段；分块大小与并行度取自配置
pub fn predict_stage(
    config: &PipelineConfig,
    input_dir: &Path,
    forwarded: Vec<OsString>,
) -> Result<DispatchReport> {
    output::print_header("Property Prediction");

    let parallel = config.prediction.parallel;
    let chunk_size = config.prediction.chunk_size;
    output::print_field("Input folder", &input_dir.display().to_string());
    output::print_field("Chunk size", &chunk_size.to_string());
    output::print_field(
        "Parallel workers",
        &if parallel == 0 {
            "all cores".to_string()
        } else {
            parallel.to_string()
        },
    );

    // 单 worker 时由 worker 自己显示逐结构进度，总进度条随之隐藏
    let launcher = ProcessLauncher::new(input_dir, forwarded, parallel == 1)?;
    let report = Dispatcher::new(&config.prediction, &launcher)
        .with_parallel(parallel)
        .dispatch(input_dir, chunk_size)?;

    if report.total_files == 0 {
        output::print_warning(&format!(
            "No CIF files found in '{}'. Nothing to predict.",
            input_dir.display()
        ));
        return Ok(report);
    }

    output::print_info(&format!(
        "{} structures in {} chunks, {} chunks failed",
        report.total_files,
        report.chunks.len(),
        report.batch.failed
    ));

    match &report.merged {
        Some(merged) => output::print_done(&format!(
            "Success: {} results saved to {}",
            merged.rows,
            merged.path.display()
        )),
        None => output::print_warning("No CSV files found to aggregate."),
    }

    Ok(report)
}
