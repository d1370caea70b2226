//! # 预测 worker
//!
//! 处理快照中的一个区间 `[start, end)`：逐个读取结构、计算经验化学式、
//! 经临时 POSCAR 转换为模型输入，再依次调用每个性质模型。
//!
//! ## 功能
//! - 单个模型失败只在该列记 `error`
//! - 结构读取 / 转换失败时整行记 `parse_error`
//! - 预测服务失联时中止整个区间，不写结果表
//! - 谱线类输出写入旁路 JSON 文件 `<列名>_<stem>.json`
//! - 处理完整个区间后才写结果表（先写 `.tmp` 再重命名）
//!
//! ## 依赖关系
//! - 被 `commands/worker.rs` 调用
//! - 使用 `calculators/predictor.rs`, `parsers/`
//! - 使用 `batch/collector.rs` 读取快照, `batch/dispatcher.rs` 的分块命名

use super::collector::read_snapshot;
use super::dispatcher::Chunk;
use crate::calculators::PropertyPredictor;
use crate::config::{OutputKind, PropertyModel};
use crate::error::{PipelineError, Result};
use crate::models::{ChunkRow, PropertyValue};
use crate::parsers::{parse_structure_file, poscar::write_poscar_file};
use crate::utils::output;

use indicatif::ProgressBar;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// 一次 worker 运行的结果
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub rows: Vec<ChunkRow>,
    pub parse_errors: usize,
    pub model_errors: usize,
    /// 写出的结果表；区间为空时为 `None`
    pub table: Option<PathBuf>,
}

/// 作用域结束时删除的临时文件
struct TransientFile(PathBuf);

impl Drop for TransientFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_file(&self.0) {
                tracing::debug!(path = %self.0.display(), error = %e, "failed to remove transient file");
            }
        }
    }
}

/// 单个区间的预测
pub struct PredictionWorker<'a> {
    predictor: &'a mut dyn PropertyPredictor,
    models: &'a [PropertyModel],
    output_dir: PathBuf,
    progress: Option<ProgressBar>,
}

impl<'a> PredictionWorker<'a> {
    pub fn new(
        predictor: &'a mut dyn PropertyPredictor,
        models: &'a [PropertyModel],
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        PredictionWorker {
            predictor,
            models,
            output_dir: output_dir.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// 处理快照中的 `[start, end)` 区间
    ///
    /// 区间越界部分被截断；区间为空时不写任何文件。
    /// 预测服务失联时返回错误且不写结果表，该区间在合并时缺失。
    pub fn run(&mut self, snapshot: &Path, start: usize, end: usize) -> Result<WorkerReport> {
        let files = read_snapshot(snapshot)?;
        let end = end.min(files.len());
        let mut report = WorkerReport::default();
        if start >= end {
            return Ok(report);
        }
        let chunk = Chunk { start, end };

        if let Some(pb) = &self.progress {
            pb.set_length(chunk.len() as u64);
        }

        for path in &files[start..end] {
            let row = match self.predict_item(path) {
                Ok(row) => row,
                Err(e) => {
                    if let Some(pb) = &self.progress {
                        pb.finish_and_clear();
                    }
                    return Err(e);
                }
            };
            if row.values.iter().any(|v| *v == PropertyValue::ParseError) {
                report.parse_errors += 1;
            }
            report.model_errors += row
                .values
                .iter()
                .filter(|v| **v == PropertyValue::Error)
                .count();
            report.rows.push(row);

            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        let table = self.output_dir.join(chunk.table_name());
        write_chunk_table(&table, self.models, &report.rows)?;
        report.table = Some(table);
        Ok(report)
    }

    /// 预测单个结构；除服务失联外的失败都转换为哨兵值
    fn predict_item(&mut self, path: &Path) -> Result<ChunkRow> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.predict_structure(path, &stem) {
            Ok(row) => Ok(row),
            Err(e) if e.is_server_gone() => Err(e),
            Err(e) => {
                tracing::debug!(structure = %stem, error = %e, "parse error");
                self.report(&format!("Parse Error: {}, Error: {}", stem, e));
                Ok(ChunkRow::parse_error(stem, self.models.len()))
            }
        }
    }

    fn predict_structure(&mut self, path: &Path, stem: &str) -> Result<ChunkRow> {
        let crystal = parse_structure_file(path)?;
        let formula = crystal.empirical_formula();

        let handle = {
            // 进程号区分并行 worker，避免同名临时文件冲突
            let poscar = TransientFile(
                self.output_dir
                    .join(format!(".{}.{}.vasp", stem, std::process::id())),
            );
            write_poscar_file(&crystal, &poscar.0)?;
            self.predictor.load(&poscar.0)?
        };

        let models = self.models;
        let values = models
            .iter()
            .map(|model| self.predict_column(handle, model, stem))
            .collect::<Result<Vec<_>>>();
        self.predictor.release(handle);
        let values = values?;

        Ok(ChunkRow {
            file: stem.to_string(),
            formula,
            values,
        })
    }

    fn predict_column(
        &mut self,
        handle: u64,
        model: &PropertyModel,
        stem: &str,
    ) -> Result<PropertyValue> {
        let raw = match self.predictor.predict(handle, &model.model) {
            Ok(raw) => raw,
            Err(e) if e.is_server_gone() => return Err(e),
            Err(e) => {
                tracing::debug!(structure = %stem, model = %model.model, error = %e, "prediction failed");
                return Ok(PropertyValue::Error);
            }
        };

        Ok(match model.kind {
            OutputKind::Scalar => PropertyValue::coerce_scalar(&raw),
            OutputKind::Series => {
                let side_file = format!("{}_{}.json", model.column, stem);
                match write_side_file(&self.output_dir.join(&side_file), &raw) {
                    Ok(()) => PropertyValue::Series { side_file },
                    Err(e) => {
                        self.report(&format!("Error saving JSON: {}", e));
                        PropertyValue::Error
                    }
                }
            }
        })
    }

    fn report(&self, msg: &str) {
        match &self.progress {
            Some(pb) => pb.suspend(|| output::print_warning(msg)),
            None => output::print_warning(msg),
        }
    }
}

fn write_side_file(path: &Path, raw: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(raw)?;
    fs::write(path, text).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 写出分块结果表：先写 `.tmp`，完成后重命名
pub fn write_chunk_table(path: &Path, models: &[PropertyModel], rows: &[ChunkRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        let mut header = vec!["file", "formula"];
        header.extend(models.iter().map(|m| m.column.as_str()));
        writer.write_record(&header)?;
        for row in rows {
            writer.write_record(row.to_record())?;
        }
        writer.flush().map_err(|e| PipelineError::FileWriteError {
            path: tmp.display().to_string(),
            source: e,
        })?;
    }

    fs::rename(&tmp, path).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::collector::write_snapshot;
    use crate::calculators::StructureHandle;
    use crate::models::{Atom, Crystal, Lattice, PARSE_ERROR};
    use crate::parsers::write_structure_file;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// 记录转换文件并按模型名返回固定输出
    #[derive(Default)]
    struct FakePredictor {
        next: StructureHandle,
        loaded: Vec<PathBuf>,
        live: HashMap<StructureHandle, usize>,
        failing_model: Option<String>,
        /// 成功加载这么多个结构后服务进程退出
        dies_after: Option<usize>,
    }

    fn gone() -> PipelineError {
        PipelineError::ServerGone {
            model: "predictor".to_string(),
            reason: "Server closed its output".to_string(),
        }
    }

    impl PropertyPredictor for FakePredictor {
        fn load(&mut self, poscar: &Path) -> Result<StructureHandle> {
            if self.dies_after.is_some_and(|n| self.loaded.len() >= n) {
                return Err(gone());
            }
            let crystal = crate::parsers::poscar::parse_poscar_file(poscar)?;
            self.loaded.push(poscar.to_path_buf());
            self.next += 1;
            self.live.insert(self.next, crystal.num_atoms());
            Ok(self.next)
        }

        fn predict(&mut self, handle: StructureHandle, model: &str) -> Result<Value> {
            if !self.live.contains_key(&handle) {
                return Err(gone());
            }
            if self.failing_model.as_deref() == Some(model) {
                return Err(PipelineError::CalculatorError {
                    model: model.to_string(),
                    reason: "CUDA out of memory".to_string(),
                });
            }
            let atoms = self.live[&handle] as f64;
            Ok(match model {
                "dos_model" => json!({"energies": [0.0, 0.1], "dos": [atoms, atoms]}),
                "gap_model" => json!([atoms * 0.5, 99.0]),
                _ => json!(-atoms),
            })
        }

        fn release(&mut self, handle: StructureHandle) {
            self.live.remove(&handle);
        }
    }

    fn models() -> Vec<PropertyModel> {
        vec![
            PropertyModel {
                column: "formation_energy".to_string(),
                model: "fe_model".to_string(),
                kind: OutputKind::Scalar,
            },
            PropertyModel {
                column: "band_gap".to_string(),
                model: "gap_model".to_string(),
                kind: OutputKind::Scalar,
            },
            PropertyModel {
                column: "pdos".to_string(),
                model: "dos_model".to_string(),
                kind: OutputKind::Series,
            },
        ]
    }

    /// 写入 `n` 个结构，`corrupt` 中的序号写成无法解析的文件
    fn seed(dir: &Path, n: usize, corrupt: &[usize]) -> PathBuf {
        let lattice = Lattice::from_parameters(4.2, 4.2, 4.2, 90.0, 90.0, 90.0);
        let mut files = Vec::new();
        for i in 0..n {
            let path = dir.join(format!("gen_{}_relax.cif", i));
            if corrupt.contains(&i) {
                fs::write(&path, "data_broken\nnot a cif\n").unwrap();
            } else {
                let crystal = Crystal::new(
                    format!("gen_{}", i),
                    lattice.clone(),
                    vec![
                        Atom::new("Li", [0.0, 0.0, 0.0]),
                        Atom::new("Li", [0.5, 0.5, 0.0]),
                        Atom::new("O", [0.5, 0.0, 0.5]),
                    ],
                );
                write_structure_file(&crystal, &path).unwrap();
            }
            files.push(path);
        }
        let snapshot = dir.join("_snapshot_cifs.txt");
        write_snapshot(&snapshot, &files).unwrap();
        snapshot
    }

    #[test]
    fn test_one_corrupt_structure_in_fifty() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 50, &[17]);
        let models = models();
        let mut predictor = FakePredictor::default();

        let report = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 50)
            .unwrap();

        assert_eq!(report.rows.len(), 50);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.model_errors, 0);
        assert_eq!(report.rows[17].formula, PARSE_ERROR);
        assert_eq!(
            report.rows.iter().filter(|r| r.formula == "Li2O").count(),
            49
        );

        let table = report.table.unwrap();
        assert_eq!(table.file_name().unwrap(), "results_0000-0050.csv");
        let mut reader = csv::Reader::from_path(&table).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            vec!["file", "formula", "formation_energy", "band_gap", "pdos"]
        );
        let records: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 50);
        assert_eq!(
            &records[0],
            vec!["gen_0_relax", "Li2O", "-3", "1.5", "pdos_gen_0_relax.json"]
        );
        assert_eq!(
            &records[17],
            vec!["gen_17_relax", "parse_error", "parse_error", "parse_error", "parse_error"]
        );
    }

    #[test]
    fn test_transient_files_removed_and_handles_released() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 4, &[]);
        let models = models();
        let mut predictor = FakePredictor::default();

        PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 4)
            .unwrap();

        assert_eq!(predictor.loaded.len(), 4);
        assert!(predictor.loaded.iter().all(|p| !p.exists()));
        assert!(predictor.live.is_empty());
    }

    #[test]
    fn test_series_output_goes_to_side_file() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 1, &[]);
        let models = models();
        let mut predictor = FakePredictor::default();

        PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 1)
            .unwrap();

        let side = fs::read_to_string(dir.path().join("pdos_gen_0_relax.json")).unwrap();
        let value: Value = serde_json::from_str(&side).unwrap();
        assert_eq!(value["dos"], json!([3.0, 3.0]));
    }

    #[test]
    fn test_model_failure_only_affects_its_column() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 3, &[]);
        let models = models();
        let mut predictor = FakePredictor {
            failing_model: Some("gap_model".to_string()),
            ..FakePredictor::default()
        };

        let report = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 3)
            .unwrap();

        assert_eq!(report.model_errors, 3);
        assert_eq!(report.parse_errors, 0);
        for row in &report.rows {
            assert_eq!(row.values[0], PropertyValue::Scalar(-3.0));
            assert_eq!(row.values[1], PropertyValue::Error);
        }
    }

    #[test]
    fn test_empty_range_writes_nothing() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 3, &[]);
        let models = models();
        let mut predictor = FakePredictor::default();

        let report = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 10, 20)
            .unwrap();

        assert!(report.rows.is_empty());
        assert!(report.table.is_none());
        assert!(!dir.path().join("results_0010-0020.csv").exists());
    }

    #[test]
    fn test_chunk_range_is_truncated_to_snapshot() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 5, &[]);
        let models = models();
        let mut predictor = FakePredictor::default();

        let report = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 3, 50)
            .unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(
            report.table.unwrap().file_name().unwrap(),
            "results_0003-0005.csv"
        );
    }

    #[test]
    fn test_dead_server_aborts_chunk_without_table() {
        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 3, &[]);
        let models = models();
        let mut predictor = FakePredictor {
            dies_after: Some(1),
            ..FakePredictor::default()
        };

        let err = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 3)
            .unwrap_err();

        assert!(err.is_server_gone());
        assert!(!dir.path().join("results_0000-0003.csv").exists());
        assert!(!dir.path().join("results_0000-0003.csv.tmp").exists());
    }

    #[test]
    fn test_server_lost_during_prediction_aborts_chunk() {
        /// 加载成功，但预测时服务已退出
        struct DiesOnPredict(FakePredictor);

        impl PropertyPredictor for DiesOnPredict {
            fn load(&mut self, poscar: &Path) -> Result<StructureHandle> {
                self.0.load(poscar)
            }
            fn predict(&mut self, _: StructureHandle, _: &str) -> Result<Value> {
                Err(gone())
            }
            fn release(&mut self, handle: StructureHandle) {
                self.0.release(handle)
            }
        }

        let dir = tempdir().unwrap();
        let snapshot = seed(dir.path(), 2, &[]);
        let models = models();
        let mut predictor = DiesOnPredict(FakePredictor::default());

        let err = PredictionWorker::new(&mut predictor, &models, dir.path())
            .run(&snapshot, 0, 2)
            .unwrap_err();

        assert!(err.is_server_gone());
        assert!(predictor.0.live.is_empty());
        assert!(!dir.path().join("results_0000-0002.csv").exists());
    }
}
