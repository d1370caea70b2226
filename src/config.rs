//! # 流水线配置
//!
//! 启动时构造一次的不可变配置，按引用传入每个组件。
//! 优先级：命令行参数 > TOML 配置文件 > 默认值。
//!
//! ```toml
//! device = "cuda"
//!
//! [relax]
//! max_steps = 5000
//! fmax = 0.02
//!
//! [[prediction.models]]
//! column = "formation_energy"
//! model = "jv_formation_energy_peratom_alignn"
//!
//! [[prediction.models]]
//! column = "pdos"
//! model = "jv_pdos_alignn"
//! kind = "series"
//! ```
//!
//! ## 依赖关系
//! - 被 `main.rs` 加载
//! - 被 `commands/`, `relax/`, `batch/`, `generation/`, `calculators/` 读取

use crate::error::{PipelineError, Result};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// 计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// 由模型服务自行决定（有 GPU 用 GPU）
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

/// 全部配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub device: Device,
    /// 结果根目录（生成、弛豫、预测输出都在其下）
    pub results_dir: PathBuf,
    pub relax: RelaxConfig,
    pub potential: PotentialConfig,
    pub generator: GeneratorConfig,
    pub prediction: PredictionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            device: Device::Auto,
            results_dir: PathBuf::from("results"),
            relax: RelaxConfig::default(),
            potential: PotentialConfig::default(),
            generator: GeneratorConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

/// 弛豫阶段配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaxConfig {
    /// 最大优化步数
    pub max_steps: usize,
    /// 力收敛阈值 (eV/Å)
    pub fmax: f64,
    /// 单步最大原子位移 (Å)
    pub max_step: f64,
    /// BFGS 初始 Hessian 曲率 (eV/Å²)
    pub initial_curvature: f64,
    pub input_dir_name: String,
    pub output_dir_name: String,
    pub summary_file: String,
    pub ledger_file: String,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        RelaxConfig {
            max_steps: 5000,
            fmax: 0.02,
            max_step: 0.2,
            initial_curvature: 70.0,
            input_dir_name: "generated_crystals_cif".to_string(),
            output_dir_name: "relax_CIF".to_string(),
            summary_file: "relaxation_summary.csv".to_string(),
            ledger_file: "energy_ledger.json".to_string(),
        }
    }
}

/// 机器学习势函数服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PotentialConfig {
    /// 势函数模型名称
    pub model: String,
    /// 启动服务的命令行 (argv)
    pub command: Vec<String>,
}

impl Default for PotentialConfig {
    fn default() -> Self {
        PotentialConfig {
            model: "CHGNet-MatPES-r2SCAN-2025.2.10-2.7M-PES".to_string(),
            command: vec![
                "python".to_string(),
                "-u".to_string(),
                "potential_server.py".to_string(),
            ],
        }
    }
}

/// 条件性质关键字 -> 生成模型使用的规范性质名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditioningProperty {
    pub keyword: String,
    pub property: String,
}

impl ConditioningProperty {
    fn new(keyword: &str, property: &str) -> Self {
        ConditioningProperty {
            keyword: keyword.to_string(),
            property: property.to_string(),
        }
    }
}

/// 生成阶段配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// 生成器可执行文件
    pub program: String,
    /// 扩散引导强度
    pub guidance_factor: f64,
    /// 设置表文件名
    pub settings_file: PathBuf,
    /// 关键字注册表，顺序即匹配顺序
    pub properties: Vec<ConditioningProperty>,
    /// 保持字符串形式的性质
    pub string_property: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            program: "mattergen-generate".to_string(),
            guidance_factor: 2.0,
            settings_file: PathBuf::from("setting.csv"),
            properties: vec![
                ConditioningProperty::new("chemical_system", "chemical_system"),
                ConditioningProperty::new("energy_above_hull", "energy_above_hull"),
                ConditioningProperty::new("band_gap", "dft_band_gap"),
                ConditioningProperty::new("mag_density", "dft_mag_density"),
                ConditioningProperty::new("space_group", "space_group"),
                ConditioningProperty::new("bulk_modulus", "dft_bulk_modulus"),
            ],
            string_property: "chemical_system".to_string(),
        }
    }
}

/// 预测模型输出形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// 标量（或取首元素）
    #[default]
    Scalar,
    /// 谱线，写入旁路 JSON 文件
    Series,
}

/// 单个性质预测模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyModel {
    /// 结果表列名
    pub column: String,
    /// 预测模型名称
    pub model: String,
    #[serde(default)]
    pub kind: OutputKind,
}

/// 预测阶段配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictionConfig {
    /// 每个 worker 处理的结构数
    pub chunk_size: usize,
    /// 同时运行的 worker 进程数（0 = CPU 核数）
    pub parallel: usize,
    pub snapshot_file: String,
    pub final_file: String,
    /// 预测服务命令行 (argv)
    pub command: Vec<String>,
    pub models: Vec<PropertyModel>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            chunk_size: 50,
            parallel: 1,
            snapshot_file: "_snapshot_cifs.txt".to_string(),
            final_file: "final_results.csv".to_string(),
            command: vec![
                "python".to_string(),
                "-u".to_string(),
                "predictor_server.py".to_string(),
            ],
            models: vec![PropertyModel {
                column: "formation_energy".to_string(),
                model: "jv_formation_energy_peratom_alignn".to_string(),
                kind: OutputKind::Scalar,
            }],
        }
    }
}

impl PipelineConfig {
    /// 读取配置；未给出路径时使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        PipelineError::FileNotFound {
                            path: path.display().to_string(),
                        }
                    } else {
                        PipelineError::FileReadError {
                            path: path.display().to_string(),
                            source: e,
                        }
                    }
                })?;
                Self::from_toml(&text)?
            }
            None => PipelineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    /// 检查配置一致性
    pub fn validate(&self) -> Result<()> {
        if self.relax.max_steps == 0 {
            return Err(PipelineError::ConfigError(
                "relax.max_steps must be positive".to_string(),
            ));
        }
        if !(self.relax.fmax > 0.0) || !(self.relax.max_step > 0.0) {
            return Err(PipelineError::ConfigError(
                "relax.fmax and relax.max_step must be positive".to_string(),
            ));
        }
        if !(self.relax.initial_curvature > 0.0) {
            return Err(PipelineError::ConfigError(
                "relax.initial_curvature must be positive".to_string(),
            ));
        }
        if self.prediction.chunk_size == 0 {
            return Err(PipelineError::ConfigError(
                "prediction.chunk_size must be positive".to_string(),
            ));
        }
        if self.prediction.models.is_empty() {
            return Err(PipelineError::ConfigError(
                "prediction.models must list at least one model".to_string(),
            ));
        }
        let mut columns: Vec<&str> = self
            .prediction
            .models
            .iter()
            .map(|m| m.column.as_str())
            .collect();
        columns.sort_unstable();
        columns.dedup();
        if columns.len() != self.prediction.models.len()
            || columns.iter().any(|c| *c == "file" || *c == "formula")
        {
            return Err(PipelineError::ConfigError(
                "prediction.models columns must be unique and not 'file'/'formula'".to_string(),
            ));
        }
        if self.potential.command.is_empty() || self.prediction.command.is_empty() {
            return Err(PipelineError::ConfigError(
                "model server commands must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// 弛豫输出目录
    pub fn relax_dir(&self) -> PathBuf {
        self.results_dir.join(&self.relax.output_dir_name)
    }
}
