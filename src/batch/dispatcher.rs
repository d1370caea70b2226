//! # 分块调度器
//!
//! 把工作快照切分为固定大小的连续块，每块交给一个独立的 worker 进程，
//! 全部结束后按块起始序号合并各块结果表。
//!
//! ## 功能
//! - 快照先于任何处理写出，目录后续变化不影响本次工作集
//! - 单个 worker 崩溃只导致对应区间缺失，不重试也不中断其余块
//! - 多个 worker 可并行运行，合并顺序始终按起始序号
//! - 合并表的表头为各分块表头按首次出现顺序的并集，带 UTF-8 BOM
//!
//! ## 依赖关系
//! - 被 `commands/predict.rs` 调用
//! - 使用 `batch/collector.rs`, `batch/runner.rs`
//! - 使用 `glob` 查找分块结果表, `csv` 读写表格

use super::collector::{write_snapshot, FileCollector};
use super::runner::{BatchResult, BatchRunner, ProcessResult};
use crate::config::PredictionConfig;
use crate::error::{PipelineError, Result};

use regex::Regex;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// UTF-8 字节序标记
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 快照上的半开区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// `results_<start>-<end>.csv`，序号补零到 4 位
    pub fn table_name(&self) -> String {
        format!("results_{:04}-{:04}.csv", self.start, self.end)
    }

    pub fn label(&self) -> String {
        format!("chunk {}-{}", self.start, self.end)
    }
}

/// 把 `total` 个条目切成 `ceil(total / size)` 块
pub fn partition(total: usize, size: usize) -> Vec<Chunk> {
    let size = size.max(1);
    (0..total)
        .step_by(size)
        .map(|start| Chunk {
            start,
            end: (start + size).min(total),
        })
        .collect()
}

/// 分块启动器
///
/// 每次调用阻塞到该块的 worker 退出；非零退出返回错误。
pub trait ChunkLauncher: Sync {
    fn launch(&self, chunk: &Chunk, snapshot: &Path) -> Result<()>;

    /// worker 是否在同一终端上绘制自己的进度条
    fn shows_progress(&self) -> bool {
        false
    }
}

/// 以当前可执行文件的隐藏 `worker` 子命令启动独立进程
pub struct ProcessLauncher {
    executable: PathBuf,
    output_dir: PathBuf,
    /// 转发给 worker 的全局参数（`--config`, `--device` 等）
    global_args: Vec<OsString>,
    show_progress: bool,
}

impl ProcessLauncher {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        global_args: Vec<OsString>,
        show_progress: bool,
    ) -> Result<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| PipelineError::Other(format!("Cannot locate own executable: {}", e)))?;
        Ok(ProcessLauncher {
            executable,
            output_dir: output_dir.into(),
            global_args,
            show_progress,
        })
    }
}

impl ChunkLauncher for ProcessLauncher {
    fn launch(&self, chunk: &Chunk, snapshot: &Path) -> Result<()> {
        let mut command = Command::new(&self.executable);
        command
            .args(&self.global_args)
            .arg("worker")
            .arg(chunk.start.to_string())
            .arg(chunk.end.to_string())
            .arg(snapshot)
            .arg("--output-dir")
            .arg(&self.output_dir);
        if !self.show_progress {
            command.arg("--no-progress");
        }

        tracing::debug!(start = chunk.start, end = chunk.end, "launching worker");
        let status = command.status().map_err(|e| PipelineError::CommandFailed {
            command: self.executable.display().to_string(),
            stderr: e.to_string(),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::CommandFailed {
                command: chunk.label(),
                stderr: format!("worker exited with {}", status),
            })
        }
    }

    fn shows_progress(&self) -> bool {
        self.show_progress
    }
}

/// 合并结果
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub tables: usize,
    pub rows: usize,
}

/// 一次调度的结果
#[derive(Debug)]
pub struct DispatchReport {
    pub total_files: usize,
    pub chunks: Vec<Chunk>,
    pub batch: BatchResult,
    /// `None` 表示没有可合并的分块表
    pub merged: Option<MergeSummary>,
}

/// 批量调度
pub struct Dispatcher<'a> {
    config: &'a PredictionConfig,
    launcher: &'a dyn ChunkLauncher,
    parallel: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a PredictionConfig, launcher: &'a dyn ChunkLauncher) -> Self {
        Dispatcher {
            config,
            launcher,
            parallel: config.parallel,
        }
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// 两个进度条不能同时绘制，worker 显示自己的进度时隐藏总进度条
    fn runner(&self) -> BatchRunner {
        BatchRunner::new(self.parallel).with_progress(!self.launcher.shows_progress())
    }

    /// 处理 `input_dir` 下的全部结构；快照、分块表与合并表都写在该目录中
    pub fn dispatch(&self, input_dir: &Path, chunk_size: usize) -> Result<DispatchReport> {
        let input_dir = fs::canonicalize(input_dir).map_err(|_| PipelineError::DirectoryNotFound {
            path: input_dir.display().to_string(),
        })?;

        let files = FileCollector::new(&input_dir).with_pattern("*.cif").collect()?;
        if files.is_empty() {
            return Ok(DispatchReport {
                total_files: 0,
                chunks: Vec::new(),
                batch: BatchResult::default(),
                merged: None,
            });
        }

        let snapshot = input_dir.join(&self.config.snapshot_file);
        write_snapshot(&snapshot, &files)?;
        remove_stale_tables(&input_dir)?;

        let chunks = partition(files.len(), chunk_size);
        tracing::debug!(files = files.len(), chunks = chunks.len(), parallel = self.parallel, "dispatching");

        let runner = self.runner();
        let batch = runner.run(
            &chunks,
            "Overall Progress",
            |chunk| chunk.len() as u64,
            |chunk| match self.launcher.launch(chunk, &snapshot) {
                Ok(()) => ProcessResult::Success(chunk.label()),
                Err(e) => ProcessResult::Failed(chunk.label(), e.to_string()),
            },
        )?;

        let merged = merge_chunk_tables(&input_dir, &self.config.final_file)?;

        Ok(DispatchReport {
            total_files: files.len(),
            chunks,
            batch,
            merged,
        })
    }
}

/// 分块结果表及其起止序号，按起始序号排序
pub fn chunk_tables(dir: &Path) -> Result<Vec<(Chunk, PathBuf)>> {
    static TABLE: OnceLock<Regex> = OnceLock::new();
    let table = TABLE.get_or_init(|| Regex::new(r"^results_(\d+)-(\d+)\.csv$").expect("valid regex"));

    let pattern = format!(
        "{}/results_*.csv",
        glob::Pattern::escape(&dir.display().to_string())
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| PipelineError::InvalidArgument(format!("Invalid pattern '{}': {}", pattern, e)))?;

    let mut tables = Vec::new();
    for path in entries.filter_map(|e| e.ok()) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = table.captures(name) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (caps[1].parse(), caps[2].parse()) else {
            continue;
        };
        tables.push((Chunk { start, end }, path));
    }
    tables.sort_by_key(|(chunk, _)| (chunk.start, chunk.end));
    Ok(tables)
}

fn remove_stale_tables(dir: &Path) -> Result<()> {
    for (_, path) in chunk_tables(dir)? {
        tracing::debug!(path = %path.display(), "removing stale chunk table");
        fs::remove_file(&path).map_err(|e| PipelineError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

/// 合并 `dir` 中的全部分块结果表
///
/// 没有分块表时返回 `Ok(None)`。读取失败的表跳过并告警。
pub fn merge_chunk_tables(dir: &Path, final_name: &str) -> Result<Option<MergeSummary>> {
    let tables = chunk_tables(dir)?;

    let mut header: Vec<String> = Vec::new();
    let mut parsed: Vec<(Vec<String>, Vec<csv::StringRecord>)> = Vec::new();
    for (_, path) in &tables {
        match read_table(path) {
            Ok((columns, records)) => {
                for column in &columns {
                    if !header.contains(column) {
                        header.push(column.clone());
                    }
                }
                parsed.push((columns, records));
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable chunk table"),
        }
    }

    if parsed.is_empty() {
        return Ok(None);
    }

    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(&header)?;
    let mut rows = 0;
    for (columns, records) in &parsed {
        let index: Vec<Option<usize>> = header
            .iter()
            .map(|h| columns.iter().position(|c| c == h))
            .collect();
        for record in records {
            let row: Vec<&str> = index
                .iter()
                .map(|i| i.and_then(|i| record.get(i)).unwrap_or(""))
                .collect();
            writer.write_record(&row)?;
            rows += 1;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Other(format!("Failed to flush merged table: {}", e)))?;

    let path = dir.join(final_name);
    fs::write(&path, bytes).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(MergeSummary {
        path,
        tables: parsed.len(),
        rows,
    }))
}

fn read_table(path: &Path) -> Result<(Vec<String>, Vec<csv::StringRecord>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns = reader.headers()?.iter().map(str::to_string).collect();
    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((columns, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[test]
    fn test_partition_covers_everything() {
        let chunks = partition(120, 50);
        assert_eq!(
            chunks,
            vec![
                Chunk { start: 0, end: 50 },
                Chunk { start: 50, end: 100 },
                Chunk { start: 100, end: 120 },
            ]
        );
        assert_eq!(partition(100, 50).len(), 2);
        assert!(partition(0, 50).is_empty());
        assert_eq!(chunks.iter().map(Chunk::len).sum::<usize>(), 120);
    }

    #[test]
    fn test_table_name() {
        assert_eq!(Chunk { start: 50, end: 100 }.table_name(), "results_0050-0100.csv");
    }

    /// 把快照中对应区间的文件名写成分块表；`crash` 中的起始序号模拟崩溃
    struct FakeWorkers {
        dir: PathBuf,
        crash: Vec<usize>,
        launched: Mutex<Vec<usize>>,
    }

    impl ChunkLauncher for FakeWorkers {
        fn launch(&self, chunk: &Chunk, snapshot: &Path) -> Result<()> {
            self.launched.lock().unwrap().push(chunk.start);
            if self.crash.contains(&chunk.start) {
                return Err(PipelineError::Other("killed".to_string()));
            }
            let files = crate::batch::collector::read_snapshot(snapshot)?;
            let mut writer = csv::Writer::from_path(self.dir.join(chunk.table_name()))?;
            writer.write_record(["file", "formula", "formation_energy"])?;
            for file in &files[chunk.start..chunk.end] {
                let stem = file.file_stem().unwrap().to_string_lossy().into_owned();
                writer.write_record([stem.as_str(), "Li", "-1.0"])?;
            }
            writer.flush().unwrap();
            Ok(())
        }
    }

    #[test]
    fn test_overall_bar_hidden_when_worker_draws() {
        let dir = tempdir().unwrap();
        let config = PredictionConfig::default();

        let drawing = ProcessLauncher::new(dir.path(), Vec::new(), true).unwrap();
        assert!(drawing.shows_progress());
        assert!(!Dispatcher::new(&config, &drawing).runner().shows_progress());

        let silent = ProcessLauncher::new(dir.path(), Vec::new(), false).unwrap();
        assert!(Dispatcher::new(&config, &silent).runner().shows_progress());
    }

    fn seed(dir: &Path, n: usize) {
        for i in 0..n {
            fs::write(dir.join(format!("gen_{}_relax.cif", i)), "").unwrap();
        }
    }

    fn merged_files(path: &Path) -> Vec<String> {
        let bytes = fs::read(path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let mut reader = csv::Reader::from_reader(&bytes[UTF8_BOM.len()..]);
        reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect()
    }

    #[test]
    fn test_dispatch_merges_in_snapshot_order() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        seed(&root, 23);
        let config = PredictionConfig::default();
        let workers = FakeWorkers {
            dir: root.clone(),
            crash: vec![],
            launched: Mutex::new(Vec::new()),
        };

        let report = Dispatcher::new(&config, &workers)
            .with_parallel(4)
            .dispatch(&root, 5)
            .unwrap();

        assert_eq!(report.total_files, 23);
        assert_eq!(report.chunks.len(), 5);
        assert_eq!(report.batch.success, 5);

        let merged = report.merged.unwrap();
        assert_eq!(merged.rows, 23);
        let expected: Vec<String> = (0..23).map(|i| format!("gen_{}_relax", i)).collect();
        assert_eq!(merged_files(&merged.path), expected);
        assert!(root.join("_snapshot_cifs.txt").is_file());
    }

    #[test]
    fn test_crashed_chunk_is_absent_but_others_merge() {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        seed(&root, 12);
        let config = PredictionConfig::default();
        let workers = FakeWorkers {
            dir: root.clone(),
            crash: vec![4],
            launched: Mutex::new(Vec::new()),
        };

        let report = Dispatcher::new(&config, &workers).dispatch(&root, 4).unwrap();

        assert_eq!(workers.launched.lock().unwrap().len(), 3);
        assert_eq!(report.batch.failed, 1);
        let merged = report.merged.unwrap();
        assert_eq!(merged.tables, 2);
        let files = merged_files(&merged.path);
        assert_eq!(files.len(), 8);
        assert!(!files.contains(&"gen_5_relax".to_string()));
        assert_eq!(files.last().unwrap(), "gen_11_relax");
    }

    #[test]
    fn test_empty_directory_dispatches_nothing() {
        let dir = tempdir().unwrap();
        let config = PredictionConfig::default();
        let workers = FakeWorkers {
            dir: dir.path().to_path_buf(),
            crash: vec![],
            launched: Mutex::new(Vec::new()),
        };
        let report = Dispatcher::new(&config, &workers).dispatch(dir.path(), 50).unwrap();
        assert_eq!(report.total_files, 0);
        assert!(report.merged.is_none());
        assert!(workers.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_merge_nothing_to_aggregate() {
        let dir = tempdir().unwrap();
        assert_eq!(merge_chunk_tables(dir.path(), "final_results.csv").unwrap(), None);
        assert!(!dir.path().join("final_results.csv").exists());
    }

    #[test]
    fn test_merge_orders_by_start_index_and_unions_headers() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("results_0100-0150.csv"),
            "file,formula,formation_energy,pdos\nc,C,1.0,pdos_c.json\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("results_0000-0050.csv"),
            "file,formula,formation_energy\na,A,0.5\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("results_0050-0100.csv"),
            "file,formula,formation_energy\nb,B,error\n",
        )
        .unwrap();

        let merged = merge_chunk_tables(dir.path(), "final_results.csv")
            .unwrap()
            .unwrap();
        assert_eq!(merged.rows, 3);

        let text = fs::read_to_string(&merged.path).unwrap();
        let text = text.trim_start_matches('\u{FEFF}');
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec![
                "file,formula,formation_energy,pdos",
                "a,A,0.5,",
                "b,B,error,",
                "c,C,1.0,pdos_c.json",
            ]
        );
    }
}
