//! # 弛豫能量数据模型
//!
//! 存储每个弛豫结构的总能量、原子数与每原子能量，以及单个候选结构的弛豫结局。
//!
//! ## 依赖关系
//! - 被 `relax/engine.rs`, `relax/summary.rs` 使用
//! - 被 `commands/relax.rs` 使用

use serde::{Deserialize, Serialize};

/// 能量记录，以弛豫结构文件名为键
///
/// `energy_per_atom` 只能通过 [`EnergyRecord::new`] 得到，始终等于
/// `total_energy / atom_count`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    /// 总能量 (eV)
    pub total_energy: f64,

    /// 原子数 (> 0)
    pub atom_count: usize,

    /// 每原子能量 (eV/atom)
    pub energy_per_atom: f64,
}

impl EnergyRecord {
    /// 原子数为 0 时返回 `None`
    pub fn new(total_energy: f64, atom_count: usize) -> Option<Self> {
        if atom_count == 0 {
            return None;
        }
        Some(EnergyRecord {
            total_energy,
            atom_count,
            energy_per_atom: total_energy / atom_count as f64,
        })
    }
}

/// 弛豫汇总表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// 候选结构文件名（含扩展名）
    pub source_filename: String,
    pub atom_count: usize,
    pub total_energy: f64,
    pub energy_per_atom: f64,
}

impl SummaryRow {
    pub fn from_record(source_filename: impl Into<String>, record: &EnergyRecord) -> Self {
        SummaryRow {
            source_filename: source_filename.into(),
            atom_count: record.atom_count,
            total_energy: record.total_energy,
            energy_per_atom: record.energy_per_atom,
        }
    }
}

/// 单个候选结构的弛豫结局
#[derive(Debug, Clone, PartialEq)]
pub enum RelaxOutcome {
    /// 本次运行中完成弛豫并写出结构
    Relaxed { record: EnergyRecord, steps: usize },
    /// 已存在弛豫结构，仅重新计算能量
    Resumed { record: EnergyRecord },
    /// 步数预算内未收敛（不是错误）
    NotConverged { steps: usize },
    /// 读取 / 计算 / 优化过程中出错
    Failed { reason: String },
}

impl RelaxOutcome {
    pub fn record(&self) -> Option<&EnergyRecord> {
        match self {
            RelaxOutcome::Relaxed { record, .. } | RelaxOutcome::Resumed { record } => Some(record),
            _ => None,
        }
    }
}
