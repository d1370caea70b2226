//! # 性质预测器
//!
//! 图神经网络性质预测模型作为外部黑盒。预测前先把结构转换成模型需要的
//! 输入表示（由服务端从临时 POSCAR 读取并返回句柄），之后按句柄逐个
//! 模型预测。
//!
//! ## 依赖关系
//! - 被 `batch/worker.rs` 使用
//! - 使用 `calculators/server.rs`

use super::server::ModelServer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

use serde_json::{json, Value};
use std::path::Path;

/// 已转换结构的句柄
pub type StructureHandle = u64;

/// 性质预测器
pub trait PropertyPredictor {
    /// 读取 POSCAR，转换为模型输入表示
    fn load(&mut self, poscar: &Path) -> Result<StructureHandle>;

    /// 用指定模型预测，返回原始输出
    fn predict(&mut self, handle: StructureHandle, model: &str) -> Result<Value>;

    /// 释放已转换的结构
    fn release(&mut self, handle: StructureHandle);
}

/// 由常驻模型服务提供的预测器
pub struct ServerPredictor {
    server: ModelServer,
}

impl ServerPredictor {
    /// 启动预测服务；stderr 默认丢弃
    pub fn start(config: &PipelineConfig, quiet: bool) -> Result<Self> {
        let extra = ["--device".to_string(), config.device.to_string()];
        let server = ModelServer::spawn("predictor", &config.prediction.command, &extra, quiet)?;
        Ok(ServerPredictor { server })
    }
}

impl PropertyPredictor for ServerPredictor {
    fn load(&mut self, poscar: &Path) -> Result<StructureHandle> {
        let response = self.server.request(&json!({
            "op": "load",
            "poscar": poscar.display().to_string(),
        }))?;
        response
            .get("handle")
            .and_then(Value::as_u64)
            .ok_or_else(|| PipelineError::CalculatorError {
                model: self.server.name().to_string(),
                reason: "Load response carries no handle".to_string(),
            })
    }

    fn predict(&mut self, handle: StructureHandle, model: &str) -> Result<Value> {
        let mut response = self.server.request(&json!({
            "op": "predict",
            "handle": handle,
            "model": model,
        }))?;
        response
            .get_mut("output")
            .map(Value::take)
            .ok_or_else(|| PipelineError::CalculatorError {
                model: model.to_string(),
                reason: "Prediction response carries no output".to_string(),
            })
    }

    fn release(&mut self, handle: StructureHandle) {
        if let Err(e) = self.server.request(&json!({"op": "release", "handle": handle})) {
            tracing::debug!(handle, error = %e, "release failed");
        }
    }
}
