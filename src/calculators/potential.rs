//! # 势能面计算器
//!
//! 机器学习原子间势作为外部黑盒，只通过 [`PotentialEvaluator`] 提供
//! 能量与原子受力。弛豫引擎与优化器只依赖这个 trait。
//!
//! ## 依赖关系
//! - 被 `relax/engine.rs`, `relax/optimizer.rs` 使用
//! - 使用 `calculators/server.rs`

use super::server::ModelServer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::models::Crystal;

use serde_json::{json, Value};

/// 一次能量 / 受力计算的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// 总能量 (eV)
    pub energy: f64,
    /// 每个原子的笛卡尔受力 (eV/Å)
    pub forces: Vec<[f64; 3]>,
}

impl Evaluation {
    /// 最大单原子受力模长
    pub fn fmax(&self) -> f64 {
        self.forces
            .iter()
            .map(|f| (f[0] * f[0] + f[1] * f[1] + f[2] * f[2]).sqrt())
            .fold(0.0, f64::max)
    }
}

/// 势能面计算器
pub trait PotentialEvaluator {
    /// 模型名称（用于日志）
    fn name(&self) -> &str;

    /// 计算给定结构的能量与受力
    fn evaluate(&mut self, crystal: &Crystal) -> Result<Evaluation>;

    /// 在同一设备上重新构造计算器
    fn reattach(&mut self) -> Result<()>;
}

/// 计算能量；若因设备放置不一致失败，重新挂载计算器后重试一次
///
/// 其他错误不重试，直接返回。
pub fn evaluate_with_recovery(
    evaluator: &mut dyn PotentialEvaluator,
    crystal: &Crystal,
) -> Result<Evaluation> {
    match evaluator.evaluate(crystal) {
        Err(e) if e.is_device_mismatch() => {
            tracing::warn!(structure = %crystal.name, error = %e, "reattaching calculator after device mismatch");
            evaluator.reattach()?;
            evaluator.evaluate(crystal)
        }
        other => other,
    }
}

/// 由常驻模型服务提供的势函数
pub struct ServerPotential {
    server: ModelServer,
}

impl ServerPotential {
    /// 按配置启动势函数服务
    pub fn start(config: &PipelineConfig, quiet: bool) -> Result<Self> {
        let extra = [
            "--model".to_string(),
            config.potential.model.clone(),
            "--device".to_string(),
            config.device.to_string(),
        ];
        let server = ModelServer::spawn(&config.potential.model, &config.potential.command, &extra, quiet)?;
        Ok(ServerPotential { server })
    }
}

impl PotentialEvaluator for ServerPotential {
    fn name(&self) -> &str {
        self.server.name()
    }

    fn evaluate(&mut self, crystal: &Crystal) -> Result<Evaluation> {
        let request = json!({
            "op": "evaluate",
            "structure": structure_payload(crystal),
        });
        let response = self.server.request(&request)?;
        parse_evaluation(self.server.name(), &response, crystal.num_atoms())
    }

    fn reattach(&mut self) -> Result<()> {
        self.server.request(&json!({"op": "reattach"})).map(|_| ())
    }
}

/// 结构的 JSON 表示：晶格行向量、元素、笛卡尔坐标
pub fn structure_payload(crystal: &Crystal) -> Value {
    json!({
        "lattice": crystal.lattice.matrix,
        "species": crystal.species(),
        "positions": crystal.cartesian_positions(),
        "pbc": [true, true, true],
    })
}

fn parse_evaluation(model: &str, response: &Value, num_atoms: usize) -> Result<Evaluation> {
    let invalid = |reason: &str| PipelineError::CalculatorError {
        model: model.to_string(),
        reason: reason.to_string(),
    };

    let energy = response
        .get("energy")
        .and_then(Value::as_f64)
        .filter(|e| e.is_finite())
        .ok_or_else(|| invalid("Response carries no finite energy"))?;

    let forces: Vec<[f64; 3]> = response
        .get("forces")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| invalid("Response carries no forces"))?;

    if forces.len() != num_atoms {
        return Err(invalid(&format!(
            "Expected forces for {} atoms, got {}",
            num_atoms,
            forces.len()
        )));
    }
    if forces.iter().flatten().any(|f| !f.is_finite()) {
        return Err(invalid("Non-finite force component"));
    }

    Ok(Evaluation { energy, forces })
}
