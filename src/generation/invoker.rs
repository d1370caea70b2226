//! # 生成器调用
//!
//! 把 [`GenerationRequest`] 拼成一条 shell 命令并阻塞执行。
//! 不重试，也不解析生成器的输出，只回显退出状态。
//!
//! ## 依赖关系
//! - 被 `commands/generate.rs` 调用
//! - 使用 `generation/settings.rs` 中的请求类型

use super::settings::GenerationRequest;
use crate::error::{PipelineError, Result};

use std::fs;
use std::process::{Command, ExitStatus};

/// 条件性质映射的文本形式，例如 `{'dft_band_gap': 3.0}`
pub fn properties_text(request: &GenerationRequest) -> String {
    let parts: Vec<String> = request
        .conditions
        .iter()
        .map(|(name, value)| format!("'{}': {}", name, value))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// 完整命令行
pub fn command_line(request: &GenerationRequest, program: &str) -> String {
    let mut output_dir = request.output_dir.display().to_string();
    if !output_dir.ends_with('/') {
        output_dir.push('/');
    }
    format!(
        "{} \"{}\" --pretrained-name=\"{}\" --batch_size={} --num_batches={} \
         --properties_to_condition_on=\"{}\" --diffusion_guidance_factor={:?}",
        program,
        output_dir,
        request.model_name,
        request.batch_size,
        request.num_batches,
        properties_text(request),
        request.guidance_factor,
    )
}

/// 创建输出目录（已存在时不做任何事）
pub fn prepare_output_dir(request: &GenerationRequest) -> Result<()> {
    fs::create_dir_all(&request.output_dir).map_err(|e| PipelineError::FileWriteError {
        path: request.output_dir.display().to_string(),
        source: e,
    })
}

/// 通过系统 shell 执行命令，输出直接显示在终端
pub fn invoke(command: &str) -> Result<ExitStatus> {
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    tracing::debug!(%command, "invoking generator");
    Command::new(shell)
        .args([flag, command])
        .status()
        .map_err(|_| PipelineError::CommandNotFound {
            command: shell.to_string(),
        })
}
