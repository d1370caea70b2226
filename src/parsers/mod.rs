//! # 解析器模块
//!
//! 提供晶体结构文件的读写。
//!
//! ## 依赖关系
//! - 被 `relax/` 和 `batch/worker.rs` 使用
//! - 使用 `models/` 数据模型
//! - 子模块: cif, poscar

pub mod cif;
pub mod poscar;

use crate::error::{PipelineError, Result};
use crate::models::Crystal;
use std::fs;
use std::path::Path;

/// 从文件路径推断格式并解析
pub fn parse_structure_file(path: &Path) -> Result<Crystal> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "cif" => cif::parse_cif_file(path),
        "vasp" | "poscar" => poscar::parse_poscar_file(path),
        _ => {
            // 可能是 POSCAR/CONTCAR (无扩展名)
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("POSCAR") || name.starts_with("CONTCAR") {
                    return poscar::parse_poscar_file(path);
                }
            }
            Err(PipelineError::UnsupportedFormat(format!(
                "Cannot determine format for: {}",
                path.display()
            )))
        }
    }
}

/// 按扩展名写出结构文件（`.cif` 或 POSCAR 系）
pub fn write_structure_file(crystal: &Crystal, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let content = match ext.as_str() {
        "cif" => cif::to_cif_string(crystal),
        "vasp" | "poscar" => poscar::to_poscar_string(crystal),
        other => {
            return Err(PipelineError::UnsupportedFormat(format!(
                "Cannot write structure as '{}': {}",
                other,
                path.display()
            )))
        }
    };

    fs::write(path, content).map_err(|e| PipelineError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
