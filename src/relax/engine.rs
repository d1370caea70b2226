//! # 弛豫引擎
//!
//! 对候选结构集合逐个执行几何弛豫，汇总能量记录。
//!
//! ## 功能
//! - 已有检查点的结构只重新计算能量
//! - 单个结构失败只记录，不中断整个批次
//! - 未收敛计为失败，但不写出结构
//!
//! ## 依赖关系
//! - 被 `commands/relax.rs` 调用
//! - 使用 `relax/optimizer.rs`, `relax/ledger.rs`
//! - 使用 `calculators/potential.rs`

use super::ledger::CheckpointLedger;
use super::optimizer::{optimize, OptimizeOutcome, RelaxPolicy};
use crate::calculators::{evaluate_with_recovery, PotentialEvaluator};
use crate::error::{PipelineError, Result};
use crate::models::{EnergyRecord, RelaxOutcome, SummaryRow};
use crate::parsers::parse_structure_file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 一次弛豫批次的汇总
#[derive(Debug, Default)]
pub struct RelaxReport {
    /// 以弛豫结构文件名为键的能量记录
    pub energies: BTreeMap<String, EnergyRecord>,
    /// 汇总表行，顺序与候选顺序一致
    pub rows: Vec<SummaryRow>,
    /// 每个候选的结局
    pub outcomes: Vec<(String, RelaxOutcome)>,
    pub relaxed: usize,
    pub resumed: usize,
    pub not_converged: usize,
    pub crashed: usize,
}

impl RelaxReport {
    /// 失败数 = 未收敛 + 出错
    pub fn failure_count(&self) -> usize {
        self.not_converged + self.crashed
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    fn record(&mut self, candidate: &Path, relaxed: &Path, outcome: RelaxOutcome) {
        let source = file_name(candidate);
        match &outcome {
            RelaxOutcome::Relaxed { record, .. } | RelaxOutcome::Resumed { record } => {
                if matches!(outcome, RelaxOutcome::Relaxed { .. }) {
                    self.relaxed += 1;
                } else {
                    self.resumed += 1;
                }
                self.energies.insert(file_name(relaxed), *record);
                self.rows.push(SummaryRow::from_record(source.clone(), record));
            }
            RelaxOutcome::NotConverged { .. } => self.not_converged += 1,
            RelaxOutcome::Failed { .. } => self.crashed += 1,
        }
        self.outcomes.push((source, outcome));
    }
}

/// 弛豫引擎
pub struct RelaxationEngine<'a> {
    evaluator: &'a mut dyn PotentialEvaluator,
    ledger: CheckpointLedger,
    policy: RelaxPolicy,
}

impl<'a> RelaxationEngine<'a> {
    pub fn new(
        evaluator: &'a mut dyn PotentialEvaluator,
        ledger: CheckpointLedger,
        policy: RelaxPolicy,
    ) -> Self {
        RelaxationEngine {
            evaluator,
            ledger,
            policy,
        }
    }

    /// 依次弛豫所有候选结构
    ///
    /// `on_done` 在每个候选处理完后调用，用于进度显示。
    pub fn relax_all<F>(&mut self, candidates: &[PathBuf], mut on_done: F) -> RelaxReport
    where
        F: FnMut(&Path, &RelaxOutcome),
    {
        let mut report = RelaxReport::default();
        for candidate in candidates {
            let outcome = self.relax_one(candidate);
            on_done(candidate, &outcome);
            let relaxed = self.ledger.relaxed_path(candidate);
            report.record(candidate, &relaxed, outcome);
        }
        report
    }

    /// 处理单个候选结构，错误转为 [`RelaxOutcome::Failed`]
    pub fn relax_one(&mut self, candidate: &Path) -> RelaxOutcome {
        let result = if self.ledger.is_done(candidate) {
            self.resume(candidate)
        } else {
            self.relax_fresh(candidate)
        };
        result.unwrap_or_else(|e| {
            tracing::debug!(candidate = %candidate.display(), error = %e, "relaxation failed");
            RelaxOutcome::Failed {
                reason: e.to_string(),
            }
        })
    }

    fn resume(&mut self, candidate: &Path) -> Result<RelaxOutcome> {
        let path = self.ledger.relaxed_path(candidate);
        tracing::debug!(relaxed = %path.display(), "checkpoint found, re-evaluating energy");
        let crystal = parse_structure_file(&path)?;
        let evaluation = evaluate_with_recovery(self.evaluator, &crystal)?;
        let record = energy_record(evaluation.energy, crystal.num_atoms(), &path)?;
        Ok(RelaxOutcome::Resumed { record })
    }

    fn relax_fresh(&mut self, candidate: &Path) -> Result<RelaxOutcome> {
        let mut crystal = parse_structure_file(candidate)?;
        match optimize(&mut crystal, self.evaluator, &self.policy)? {
            OptimizeOutcome::Converged { steps, evaluation } => {
                let target = self.ledger.relaxed_path(candidate);
                if let Some(stem) = target.file_stem() {
                    crystal.name = stem.to_string_lossy().into_owned();
                }
                let record = energy_record(evaluation.energy, crystal.num_atoms(), candidate)?;
                self.ledger.commit(candidate, &crystal)?;
                tracing::debug!(candidate = %candidate.display(), steps, energy = record.total_energy, "relaxed");
                Ok(RelaxOutcome::Relaxed { record, steps })
            }
            OptimizeOutcome::NotConverged { steps } => {
                tracing::debug!(candidate = %candidate.display(), steps, "not converged");
                Ok(RelaxOutcome::NotConverged { steps })
            }
        }
    }
}

fn energy_record(energy: f64, atom_count: usize, path: &Path) -> Result<EnergyRecord> {
    EnergyRecord::new(energy, atom_count).ok_or_else(|| PipelineError::ParseError {
        format: "structure".to_string(),
        path: path.display().to_string(),
        reason: "structure contains no atoms".to_string(),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
