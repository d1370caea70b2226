//! # worker 子命令实现
//!
//! 由 `predict` 启动的独立进程：加载预测模型，处理快照的一个区间。
//! 区间为空时不启动预测服务，直接正常退出。
//!
//! ## 依赖关系
//! - 使用 `cli/predict.rs` 定义的参数
//! - 使用 `batch/worker.rs`, `calculators/predictor.rs`

use crate::batch::collector::read_snapshot;
use crate::batch::PredictionWorker;
use crate::calculators::ServerPredictor;
use crate::cli::predict::WorkerArgs;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::utils::progress;

use std::path::PathBuf;

/// 执行单个区间的预测
pub fn execute(args: &WorkerArgs, config: &PipelineConfig) -> Result<()> {
    let total = read_snapshot(&args.snapshot)?.len();
    if args.start >= args.end.min(total) {
        tracing::debug!(start = args.start, end = args.end, total, "empty chunk, nothing to do");
        return Ok(());
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        args.snapshot
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let mut predictor = ServerPredictor::start(config, true)?;
    let mut worker = PredictionWorker::new(&mut predictor, &config.prediction.models, output_dir);
    if !args.no_progress {
        worker = worker.with_progress(progress::create_worker_bar(args.start, args.end));
    }

    let report = worker.run(&args.snapshot, args.start, args.end)?;
    tracing::info!(
        start = args.start,
        end = args.end,
        rows = report.rows.len(),
        parse_errors = report.parse_errors,
        model_errors = report.model_errors,
        "chunk finished"
    );
    Ok(())
}
