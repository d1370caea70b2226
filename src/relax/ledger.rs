//! # 弛豫检查点
//!
//! 候选结构 `<stem>.cif` 的弛豫结构写到 `<out>/<stem>_relax.cif`。
//! 该文件存在即视为已完成，下次运行只重新计算能量，不再优化。
//!
//! 结构先写入同目录下的 `.tmp` 文件再重命名，中断的写入不会留下半个
//! 检查点。
//!
//! ## 依赖关系
//! - 被 `relax/engine.rs` 使用
//! - 使用 `parsers/` 写出结构

use crate::error::{PipelineError, Result};
use crate::models::Crystal;
use crate::parsers::write_structure_file;

use std::fs;
use std::path::{Path, PathBuf};

/// 弛豫结构文件名后缀
pub const RELAX_SUFFIX: &str = "_relax";

/// 以弛豫输出目录为载体的检查点
#[derive(Debug, Clone)]
pub struct CheckpointLedger {
    output_dir: PathBuf,
}

impl CheckpointLedger {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        CheckpointLedger {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 候选结构对应的弛豫结构路径
    pub fn relaxed_path(&self, candidate: &Path) -> PathBuf {
        let stem = candidate
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = candidate
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cif".to_string());
        self.output_dir
            .join(format!("{}{}.{}", stem, RELAX_SUFFIX, ext))
    }

    pub fn is_done(&self, candidate: &Path) -> bool {
        self.relaxed_path(candidate).is_file()
    }

    /// 写出弛豫结构，返回其路径
    pub fn commit(&self, candidate: &Path, crystal: &Crystal) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|e| PipelineError::FileWriteError {
            path: self.output_dir.display().to_string(),
            source: e,
        })?;

        let target = self.relaxed_path(candidate);
        // 保留扩展名，写出时才能按格式分派
        let tmp = target.with_file_name(format!(
            ".tmp_{}",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        write_structure_file(crystal, &tmp)?;
        fs::rename(&tmp, &target).map_err(|e| PipelineError::FileWriteError {
            path: target.display().to_string(),
            source: e,
        })?;
        Ok(target)
    }
}

/// 是否为弛豫产物（而不是候选结构）
pub fn is_relaxed_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with(RELAX_SUFFIX))
        .unwrap_or(false)
}
