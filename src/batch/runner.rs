//! # 批量执行器
//!
//! 在固定大小的线程池上并行执行批量任务。
//!
//! ## 功能
//! - 基于 rayon 的并行迭代
//! - 按工作量加权的进度条（一个任务可对应多个文件）
//! - 错误收集与汇总报告
//!
//! ## 依赖关系
//! - 被 `batch/dispatcher.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{PipelineError, Result};
use crate::utils::{output, progress};

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 单个任务处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// 处理成功
    Success(String),
    /// 跳过（如没有可处理的内容）
    Skipped(String),
    /// 处理失败
    Failed(String, String), // (任务标签, 错误信息)
}

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    /// 成功数量
    pub success: usize,
    /// 跳过数量
    pub skipped: usize,
    /// 失败数量
    pub failed: usize,
    /// 失败详情
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    /// 合并处理结果
    pub fn merge(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Success(_) => self.success += 1,
            ProcessResult::Skipped(_) => self.skipped += 1,
            ProcessResult::Failed(label, err) => {
                self.failed += 1;
                self.failures.push((label, err));
            }
        }
    }

    /// 总处理数量
    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

/// 批量执行器
pub struct BatchRunner {
    /// 并行作业数
    jobs: usize,
    /// 是否绘制总进度条
    show_progress: bool,
}

impl BatchRunner {
    /// 创建新的批量执行器（0 = CPU 核数）
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self {
            jobs,
            show_progress: true,
        }
    }

    /// 任务自己绘制进度时关闭总进度条
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn shows_progress(&self) -> bool {
        self.show_progress
    }

    /// 并行处理任务列表
    ///
    /// `units` 给出每个任务在进度条上占的份量；结果顺序与输入一致。
    pub fn run<T, U, F>(&self, items: &[T], message: &str, units: U, processor: F) -> Result<BatchResult>
    where
        T: Sync,
        U: Fn(&T) -> u64 + Sync,
        F: Fn(&T) -> ProcessResult + Sync + Send,
    {
        let total: u64 = items.iter().map(&units).sum();
        let pb = if self.show_progress {
            progress::create_progress_bar(total, message)
        } else {
            ProgressBar::hidden()
        };

        let failed_count = AtomicUsize::new(0);

        // 配置 rayon 线程池
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| PipelineError::Other(format!("Failed to build thread pool: {}", e)))?;

        let results: Vec<ProcessResult> = pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let result = processor(item);

                    if let ProcessResult::Failed(label, err) = &result {
                        failed_count.fetch_add(1, Ordering::Relaxed);
                        pb.suspend(|| output::print_error(&format!("{}: {}", label, err)));
                    }

                    pb.inc(units(item));
                    result
                })
                .collect()
        });

        pb.finish_and_clear();
        tracing::debug!(failed = failed_count.load(Ordering::Relaxed), total = items.len(), "batch finished");

        // 汇总结果
        let mut batch_result = BatchResult::default();
        for result in results {
            batch_result.merge(result);
        }

        Ok(batch_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_outcomes() {
        let runner = BatchRunner::new(2);
        let items: Vec<usize> = (0..10).collect();
        let result = runner
            .run(&items, "test", |_| 3, |i| match i % 3 {
                0 => ProcessResult::Success(i.to_string()),
                1 => ProcessResult::Skipped(i.to_string()),
                _ => ProcessResult::Failed(i.to_string(), "boom".to_string()),
            })
            .unwrap();

        assert_eq!(result.total(), 10);
        assert_eq!(result.success, 4);
        assert_eq!(result.skipped, 3);
        assert_eq!(result.failed, 3);
        assert_eq!(result.failures[0], ("2".to_string(), "boom".to_string()));
    }

    #[test]
    fn test_hidden_progress_still_counts() {
        let runner = BatchRunner::new(1).with_progress(false);
        assert!(!runner.shows_progress());
        let items = vec![1u64, 2, 3];
        let result = runner
            .run(&items, "test", |n| *n, |n| ProcessResult::Success(n.to_string()))
            .unwrap();
        assert_eq!(result.success, 3);
    }

    #[test]
    fn test_zero_jobs_uses_all_cpus() {
        assert_eq!(BatchRunner::new(0).jobs(), num_cpus::get());
    }
}
